//! First stage: resolve the downstream route.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::Router;

/// Matches the upstream request against the current route table.
#[derive(Debug)]
pub struct RouteFinderStage {
    router: Arc<Router>,
}

impl RouteFinderStage {
    pub fn new(router: Arc<Router>) -> Self {
        Self { router }
    }
}

#[async_trait]
impl PipelineStage for RouteFinderStage {
    fn name(&self) -> &'static str {
        "route_finder"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let matched = self.router.find_route(
            ctx.upstream.uri.path(),
            &ctx.upstream.method,
            ctx.upstream_host(),
            &ctx.upstream.headers,
        )?;
        tracing::debug!(
            request_id = %ctx.request_id,
            route = %matched.route.name,
            placeholders = matched.placeholders.len(),
            "Route matched"
        );
        ctx.matched = Some(matched);
        Ok(())
    }
}
