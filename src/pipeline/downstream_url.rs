//! Downstream path and header rewriting.
//!
//! The path is rendered before the lease. Header templates are rendered after
//! it so `{DownstreamBaseUrl}` can name the leased instance.

use async_trait::async_trait;
use axum::http::HeaderValue;

use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::replacer::{replace, unresolved};
use crate::routing::PlaceholderNameAndValue;

/// Renders the downstream path template with the request's placeholders.
#[derive(Debug, Default)]
pub struct DownstreamUrlStage;

#[async_trait]
impl PipelineStage for DownstreamUrlStage {
    fn name(&self) -> &'static str {
        "downstream_url"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let rendered = replace(&route.downstream_path_template, ctx.placeholders());

        let missing = unresolved(&rendered);
        if !missing.is_empty() {
            tracing::error!(
                request_id = %ctx.request_id,
                route = %route.name,
                template = %route.downstream_path_template,
                unresolved = ?missing,
                "Downstream path has placeholders with no value"
            );
            return Err(GatewayError::DownstreamPathUnresolved(rendered));
        }

        let (path, template_query) = match rendered.split_once('?') {
            Some((path, query)) => (path.to_string(), Some(query.to_string())),
            None => (rendered, None),
        };
        if let Some(extra) = template_query.filter(|q| !q.is_empty()) {
            ctx.downstream.query = Some(match ctx.downstream.query.take().filter(|q| !q.is_empty()) {
                Some(existing) => format!("{}&{}", extra, existing),
                None => extra,
            });
        }
        ctx.downstream.path = path;
        ctx.downstream.scheme = route.downstream_scheme.clone();
        Ok(())
    }
}

/// Placeholders describing the request itself, usable in header templates.
pub(crate) fn global_placeholders(ctx: &RequestContext) -> Vec<PlaceholderNameAndValue> {
    let mut globals = vec![PlaceholderNameAndValue::new("RequestId", ctx.request_id.as_str())];
    if let Some(addr) = ctx.remote_addr {
        globals.push(PlaceholderNameAndValue::new("RemoteIpAddress", addr.ip().to_string()));
    }
    if let Some(host) = ctx.upstream_host() {
        globals.push(PlaceholderNameAndValue::new("UpstreamHost", host));
    }
    if ctx.lease.is_some() {
        globals.push(PlaceholderNameAndValue::new("DownstreamBaseUrl", ctx.downstream.origin()));
    }
    globals
}

/// Sets the route's downstream header templates.
#[derive(Debug, Default)]
pub struct DownstreamHeadersStage;

#[async_trait]
impl PipelineStage for DownstreamHeadersStage {
    fn name(&self) -> &'static str {
        "downstream_headers"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        if route.downstream_headers.is_empty() {
            return Ok(());
        }

        let mut placeholders = ctx.placeholders().to_vec();
        placeholders.extend(global_placeholders(ctx));

        for (name, template) in &route.downstream_headers {
            let rendered = replace(template, &placeholders);
            if !unresolved(&rendered).is_empty() {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    route = %route.name,
                    header = %name,
                    value = %rendered,
                    "Downstream header has placeholders with no value"
                );
            }
            let value = HeaderValue::from_str(&rendered)
                .map_err(|e| GatewayError::UnmappableRequest(format!("header {}: {}", name, e)))?;
            ctx.downstream.headers.insert(name.clone(), value);
        }
        Ok(())
    }
}
