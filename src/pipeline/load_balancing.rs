//! Lease a downstream instance for the request.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::load_balancer::{LeaseGuard, LoadBalancerHouse};
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;

/// Picks the instance through the route's balancer and stores the lease.
///
/// The lease lives in the context; it is released when the pipeline drops it,
/// whatever happened to the forward call.
#[derive(Debug)]
pub struct LoadBalancingStage {
    house: Arc<LoadBalancerHouse>,
}

impl LoadBalancingStage {
    pub fn new(house: Arc<LoadBalancerHouse>) -> Self {
        Self { house }
    }
}

#[async_trait]
impl PipelineStage for LoadBalancingStage {
    fn name(&self) -> &'static str {
        "load_balancing"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let balancer = self.house.get(&route)?;
        let instance = balancer.lease(ctx).await?;

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.name,
            strategy = balancer.kind(),
            instance = %instance.host_and_port,
            "Instance leased"
        );

        ctx.downstream.host = instance.host_and_port.host.clone();
        ctx.downstream.port = instance.host_and_port.port;
        ctx.lease = Some(LeaseGuard::new(balancer, instance));
        Ok(())
    }
}
