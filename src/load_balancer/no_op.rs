//! Single-host strategy.

use std::sync::Arc;

use async_trait::async_trait;

use crate::discovery::{ServiceDiscoveryProvider, ServiceInstance};
use crate::error::GatewayError;
use crate::load_balancer::{require_instances, LoadBalancer};
use crate::pipeline::context::RequestContext;

/// Always leases the first instance. Release does nothing.
#[derive(Debug)]
pub struct NoLoadBalancer {
    service: String,
    provider: Arc<dyn ServiceDiscoveryProvider>,
}

impl NoLoadBalancer {
    pub fn new(service: impl Into<String>, provider: Arc<dyn ServiceDiscoveryProvider>) -> Self {
        Self {
            service: service.into(),
            provider,
        }
    }
}

#[async_trait]
impl LoadBalancer for NoLoadBalancer {
    fn kind(&self) -> &'static str {
        "NoLoadBalancer"
    }

    async fn lease(&self, _ctx: &mut RequestContext) -> Result<ServiceInstance, GatewayError> {
        let instances = require_instances(&self.service, self.provider.get_instances().await?)?;
        Ok(instances[0].clone())
    }

    fn release(&self, _instance: &ServiceInstance) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticProvider;
    use crate::pipeline::context::test_context;

    #[tokio::test]
    async fn test_always_first_host() {
        let lb = NoLoadBalancer::new(
            "svc",
            Arc::new(StaticProvider::new(vec![
                ServiceInstance::new("svc", "localhost", 5001),
                ServiceInstance::new("svc", "localhost", 5002),
            ])),
        );
        let mut ctx = test_context("/", &[]);
        for _ in 0..3 {
            assert_eq!(lb.lease(&mut ctx).await.unwrap().host_and_port.port, 5001);
        }
    }
}
