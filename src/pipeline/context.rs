//! Request-scoped state threaded through the pipeline.
//!
//! One [`RequestContext`] is created per inbound request, passed by `&mut`
//! to each stage in turn and dropped when the response is produced. Dropping
//! it releases any leased instance.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, request::Parts, HeaderMap, HeaderValue, Method, Response};

use crate::error::GatewayError;
use crate::load_balancer::LeaseGuard;
use crate::pipeline::authentication::Principal;
use crate::routing::{MatchedRoute, PlaceholderNameAndValue, Route};

/// Headers that describe a single connection and are never forwarded.
const HOP_BY_HOP: [header::HeaderName; 7] = [
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// The request being built for the downstream service.
#[derive(Debug, Clone)]
pub struct DownstreamRequest {
    pub method: Method,
    pub scheme: String,
    pub host: String,
    pub port: u16,
    pub path: String,
    /// Raw query string without the leading `?`.
    pub query: Option<String>,
    pub headers: HeaderMap,
}

impl DownstreamRequest {
    /// Start from a copy of the upstream request minus hop-by-hop and host headers.
    pub fn from_upstream(parts: &Parts) -> Self {
        let mut headers = parts.headers.clone();
        for name in &HOP_BY_HOP {
            headers.remove(name);
        }
        headers.remove(header::HOST);
        headers.remove("keep-alive");
        Self {
            method: parts.method.clone(),
            scheme: "http".to_string(),
            host: String::new(),
            port: 0,
            path: parts.uri.path().to_string(),
            query: parts.uri.query().map(str::to_string),
            headers,
        }
    }

    /// `scheme://host:port`
    pub fn base_url(&self) -> String {
        format!("{}://{}:{}", self.scheme, self.host, self.port)
    }

    /// `scheme://host`, with the port only when it is not the scheme's default.
    pub fn origin(&self) -> String {
        match (self.scheme.as_str(), self.port) {
            ("http", 80) | ("https", 443) => format!("{}://{}", self.scheme, self.host),
            _ => self.base_url(),
        }
    }

    /// Full downstream URL.
    pub fn url(&self) -> String {
        match self.query.as_deref() {
            Some(query) if !query.is_empty() => format!("{}{}?{}", self.base_url(), self.path, query),
            _ => format!("{}{}", self.base_url(), self.path),
        }
    }

    /// Append `key=value` to the query, replacing an existing `key`.
    pub fn set_query_param(&mut self, key: &str, value: &str) {
        let mut pairs: Vec<(String, String)> = self
            .query
            .as_deref()
            .map(|q| url::form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        pairs.retain(|(k, _)| k != key);
        pairs.push((key.to_string(), value.to_string()));
        self.query = Some(
            url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(pairs)
                .finish(),
        );
    }
}

/// Mutable per-request state and the single error slot.
#[derive(Debug)]
pub struct RequestContext {
    pub request_id: String,
    pub remote_addr: Option<SocketAddr>,
    /// Upstream request head as received.
    pub upstream: Parts,
    /// Upstream body, taken by the requester.
    pub body: Option<Body>,
    pub matched: Option<MatchedRoute>,
    pub principal: Option<Principal>,
    pub downstream: DownstreamRequest,
    /// Instance leased for this request; dropping it releases the lease.
    pub lease: Option<LeaseGuard>,
    pub response: Option<Response<Body>>,
    /// Extra headers for the upstream response (e.g. session cookies).
    pub response_headers: HeaderMap,
    /// Output cache key when the route caches and the lookup missed.
    pub cache_key: Option<String>,
    /// The response came from the output cache.
    pub from_cache: bool,
    pub error: Option<GatewayError>,
}

impl RequestContext {
    pub fn new(request_id: impl Into<String>, remote_addr: Option<SocketAddr>, parts: Parts, body: Body) -> Self {
        let downstream = DownstreamRequest::from_upstream(&parts);
        Self {
            request_id: request_id.into(),
            remote_addr,
            upstream: parts,
            body: Some(body),
            matched: None,
            principal: None,
            downstream,
            lease: None,
            response: None,
            response_headers: HeaderMap::new(),
            cache_key: None,
            from_cache: false,
            error: None,
        }
    }

    /// The matched route. Stages after route finding rely on it.
    pub fn route(&self) -> Result<&Arc<Route>, GatewayError> {
        self.matched
            .as_ref()
            .map(|m| &m.route)
            .ok_or_else(|| GatewayError::Internal("no route matched before a route-dependent stage".into()))
    }

    pub fn route_name(&self) -> Option<&str> {
        self.matched.as_ref().map(|m| m.route.name.as_str())
    }

    /// Placeholders captured by the route match plus any added by claims.
    pub fn placeholders(&self) -> &[PlaceholderNameAndValue] {
        self.matched
            .as_ref()
            .map(|m| m.placeholders.as_slice())
            .unwrap_or_default()
    }

    /// Upstream `Host` header, falling back to the URI authority.
    pub fn upstream_host(&self) -> Option<&str> {
        self.upstream
            .headers
            .get(header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.upstream.uri.authority().map(|a| a.as_str()))
    }

    /// Value of the named request cookie.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.upstream
            .headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value)
    }

    /// Queue a `Set-Cookie` for the upstream response.
    pub fn set_cookie(&mut self, name: &str, value: &str) -> Result<(), GatewayError> {
        let cookie = HeaderValue::from_str(&format!("{}={}; Path=/", name, value))
            .map_err(|e| GatewayError::Internal(format!("invalid cookie {}: {}", name, e)))?;
        self.response_headers.append(header::SET_COOKIE, cookie);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn test_context(uri: &str, headers: &[(&str, &str)]) -> RequestContext {
    let mut builder = axum::http::Request::builder().uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    let (parts, body) = builder.body(Body::empty()).unwrap().into_parts();
    RequestContext::new("test-request", None, parts, body)
}
