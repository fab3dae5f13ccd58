//! Per-route output cache.
//!
//! # Responsibilities
//! - Serve a stored response for a repeated GET or HEAD before any instance
//!   is leased
//! - Store successful downstream responses for the route's TTL
//! - Drop regions whose routes stopped caching after a reload
//!
//! # Design Decisions
//! - Keys are region, method, upstream path and query, plus the value of one
//!   optional request header
//! - Only responses with a known `Content-Length` within
//!   [`MAX_CACHED_BODY`] are buffered; anything else streams through untouched
//! - Expired entries are removed when they are next looked up

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Method, Response, StatusCode};
use dashmap::DashMap;
use tokio::time::Instant;

use crate::error::GatewayError;
use crate::observability::metrics;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::{Route, RouteTable};

/// Largest body kept in the cache.
pub const MAX_CACHED_BODY: usize = 1024 * 1024;

#[derive(Debug, Clone)]
struct CachedResponse {
    region: String,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
    expires_at: Instant,
}

impl CachedResponse {
    fn to_response(&self) -> Response<Body> {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Stored responses shared by every request.
#[derive(Debug, Default)]
pub struct OutputCache {
    entries: DashMap<String, CachedResponse>,
}

impl OutputCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// A fresh copy of the stored response, unless it is missing or expired.
    pub fn get(&self, key: &str) -> Option<Response<Body>> {
        let now = Instant::now();
        let found = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now).then(|| entry.to_response()));

        match found {
            Some(Some(response)) => Some(response),
            Some(None) => {
                self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, key: String, region: &str, response: &Response<Bytes>, ttl: Duration) {
        self.entries.insert(
            key,
            CachedResponse {
                region: region.to_string(),
                status: response.status(),
                headers: response.headers().clone(),
                body: response.body().clone(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Remove every entry of `region`. Returns how many were removed.
    pub fn clear_region(&self, region: &str) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.region != region);
        before - self.entries.len()
    }

    /// Keep only the regions still used by a caching route of `table`.
    pub fn reload(&self, table: &RouteTable) {
        let regions: HashSet<&str> = table
            .routes()
            .iter()
            .filter(|route| route.cache.ttl_secs > 0)
            .map(|route| route.cache_region())
            .collect();

        let before = self.entries.len();
        self.entries.retain(|_, entry| regions.contains(entry.region.as_str()));
        let dropped = before - self.entries.len();
        if dropped > 0 {
            tracing::info!(dropped, "Cached responses dropped for retired regions");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache key for this request, or `None` when the route or method does not cache.
fn cache_key(ctx: &RequestContext, route: &Route) -> Option<String> {
    if route.cache.ttl_secs == 0 {
        return None;
    }
    let method = &ctx.upstream.method;
    if method != Method::GET && method != Method::HEAD {
        return None;
    }

    let target = ctx
        .upstream
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| ctx.upstream.uri.path());
    let varied_by = route
        .cache
        .header
        .as_deref()
        .and_then(|name| ctx.upstream.headers.get(name))
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    Some(format!("{}|{}|{}|{}", route.cache_region(), method, target, varied_by))
}

/// Answers from the cache, or records the key for [`CacheStoreStage`].
#[derive(Debug)]
pub struct CacheLookupStage {
    cache: Arc<OutputCache>,
}

impl CacheLookupStage {
    pub fn new(cache: Arc<OutputCache>) -> Self {
        Self { cache }
    }
}

#[async_trait]
impl PipelineStage for CacheLookupStage {
    fn name(&self) -> &'static str {
        "output_cache"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let Some(key) = cache_key(ctx, &route) else {
            return Ok(());
        };

        match self.cache.get(&key) {
            Some(response) => {
                tracing::debug!(request_id = %ctx.request_id, route = %route.name, "Served from output cache");
                metrics::record_cache(&route.name, "hit");
                ctx.response = Some(response);
                ctx.from_cache = true;
            }
            None => {
                metrics::record_cache(&route.name, "miss");
                ctx.cache_key = Some(key);
            }
        }
        Ok(())
    }
}

/// Buffers and stores a successful downstream response.
#[derive(Debug)]
pub struct CacheStoreStage {
    cache: Arc<OutputCache>,
}

impl CacheStoreStage {
    pub fn new(cache: Arc<OutputCache>) -> Self {
        Self { cache }
    }
}

fn fits(response: &Response<Body>) -> bool {
    response
        .headers()
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<usize>().ok())
        .is_some_and(|len| len <= MAX_CACHED_BODY)
}

#[async_trait]
impl PipelineStage for CacheStoreStage {
    fn name(&self) -> &'static str {
        "output_cache_store"
    }

    fn after_response(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let Some(key) = ctx.cache_key.take() else {
            return Ok(());
        };
        let route = ctx.route()?.clone();
        let Some(response) = ctx.response.take() else {
            return Ok(());
        };
        if !response.status().is_success() || !fits(&response) {
            ctx.response = Some(response);
            return Ok(());
        }

        let (parts, body) = response.into_parts();
        let body = axum::body::to_bytes(body, MAX_CACHED_BODY)
            .await
            .map_err(|e| GatewayError::UnableToCompleteRequest(format!("reading body to cache: {}", e)))?;
        let buffered = Response::from_parts(parts, body);

        self.cache.insert(
            key,
            route.cache_region(),
            &buffered,
            Duration::from_secs(route.cache.ttl_secs),
        );
        tracing::debug!(request_id = %ctx.request_id, route = %route.name, "Response stored in output cache");

        ctx.response = Some(buffered.map(Body::from));
        Ok(())
    }
}
