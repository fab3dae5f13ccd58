//! Find-and-replace and add rules for request and response headers.
//!
//! A rule whose value reads `find, replace` rewrites every value of an existing
//! header; any other value sets the header. Both sides may use route and global
//! placeholders, so `Location = "{DownstreamBaseUrl}, {BaseUrl}"` points
//! redirects issued by a backend back at the gateway.

use async_trait::async_trait;
use axum::http::header::{InvalidHeaderName, InvalidHeaderValue};
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use thiserror::Error;

use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::downstream_url::global_placeholders;
use crate::pipeline::PipelineStage;
use crate::routing::replacer::{replace, unresolved};
use crate::routing::PlaceholderNameAndValue;

/// Why a header transform was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("invalid header name: {0}")]
    InvalidName(String),
    #[error("find part must not be empty")]
    EmptyFind,
}

impl From<InvalidHeaderName> for TransformError {
    fn from(e: InvalidHeaderName) -> Self {
        Self::InvalidName(e.to_string())
    }
}

/// One compiled header rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderTransform {
    FindAndReplace {
        name: HeaderName,
        find: String,
        replace: String,
    },
    Add {
        name: HeaderName,
        value: String,
    },
}

impl HeaderTransform {
    pub fn parse(name: &str, value: &str) -> Result<Self, TransformError> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())?;
        match value.split_once(',') {
            Some((find, with)) => {
                let find = find.trim();
                if find.is_empty() {
                    return Err(TransformError::EmptyFind);
                }
                Ok(Self::FindAndReplace {
                    name,
                    find: find.to_string(),
                    replace: with.trim_start().to_string(),
                })
            }
            None => Ok(Self::Add {
                name,
                value: value.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &HeaderName {
        match self {
            Self::FindAndReplace { name, .. } | Self::Add { name, .. } => name,
        }
    }

    /// Apply the rule to `headers`. A find part with a placeholder that has no
    /// value leaves the headers alone.
    pub fn apply(
        &self,
        headers: &mut HeaderMap,
        placeholders: &[PlaceholderNameAndValue],
    ) -> Result<(), InvalidHeaderValue> {
        match self {
            Self::Add { name, value } => {
                let rendered = replace(value, placeholders);
                headers.insert(name.clone(), HeaderValue::from_str(&rendered)?);
            }
            Self::FindAndReplace {
                name,
                find,
                replace: with,
            } => {
                let find = replace(find, placeholders);
                if !unresolved(&find).is_empty() {
                    tracing::debug!(header = %name, find = %find, "Header find part unresolved, rule skipped");
                    return Ok(());
                }
                let with = replace(with, placeholders);

                let rewritten = headers
                    .get_all(name)
                    .iter()
                    .map(|value| match value.to_str() {
                        Ok(text) if text.contains(find.as_str()) => {
                            HeaderValue::from_str(&text.replace(find.as_str(), &with))
                        }
                        _ => Ok(value.clone()),
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                if rewritten.is_empty() {
                    return Ok(());
                }

                headers.remove(name);
                for value in rewritten {
                    headers.append(name.clone(), value);
                }
            }
        }
        Ok(())
    }
}

/// Route placeholders, request globals and `{BaseUrl}`.
fn transform_placeholders(ctx: &RequestContext, base_url: Option<&str>) -> Vec<PlaceholderNameAndValue> {
    let mut placeholders = ctx.placeholders().to_vec();
    placeholders.extend(global_placeholders(ctx));

    let base = match base_url {
        Some(configured) => Some(configured.trim_end_matches('/').to_string()),
        None => ctx.upstream_host().map(|host| {
            let scheme = ctx.upstream.uri.scheme_str().unwrap_or("http");
            format!("{}://{}", scheme, host)
        }),
    };
    if let Some(base) = base {
        placeholders.push(PlaceholderNameAndValue::new("BaseUrl", base));
    }
    placeholders
}

/// Applies the route's upstream header transforms to the outgoing request.
#[derive(Debug, Default)]
pub struct UpstreamHeaderTransformStage {
    base_url: Option<String>,
}

impl UpstreamHeaderTransformStage {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl PipelineStage for UpstreamHeaderTransformStage {
    fn name(&self) -> &'static str {
        "upstream_header_transform"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        if route.upstream_header_transform.is_empty() {
            return Ok(());
        }

        let placeholders = transform_placeholders(ctx, self.base_url.as_deref());
        for transform in &route.upstream_header_transform {
            transform
                .apply(&mut ctx.downstream.headers, &placeholders)
                .map_err(|e| GatewayError::UnmappableRequest(format!("header {}: {}", transform.name(), e)))?;
        }
        Ok(())
    }
}

/// Applies the route's downstream header transforms to the relayed response.
///
/// Runs while the lease is still held so `{DownstreamBaseUrl}` names the
/// instance that answered. Responses served from the output cache were
/// transformed when they were stored.
#[derive(Debug, Default)]
pub struct DownstreamHeaderTransformStage {
    base_url: Option<String>,
}

impl DownstreamHeaderTransformStage {
    pub fn new(base_url: Option<String>) -> Self {
        Self { base_url }
    }
}

#[async_trait]
impl PipelineStage for DownstreamHeaderTransformStage {
    fn name(&self) -> &'static str {
        "downstream_header_transform"
    }

    fn after_response(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        if ctx.from_cache {
            return Ok(());
        }
        let route = ctx.route()?.clone();
        if route.downstream_header_transform.is_empty() {
            return Ok(());
        }

        let placeholders = transform_placeholders(ctx, self.base_url.as_deref());
        let Some(response) = ctx.response.as_mut() else {
            return Ok(());
        };
        for transform in &route.downstream_header_transform {
            if let Err(e) = transform.apply(response.headers_mut(), &placeholders) {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    route = %route.name,
                    header = %transform.name(),
                    error = %e,
                    "Response header transform produced an invalid value, header left as is"
                );
            }
        }
        Ok(())
    }
}
