//! Round-robin load balancing strategy.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::discovery::{ServiceDiscoveryProvider, ServiceInstance};
use crate::error::GatewayError;
use crate::load_balancer::{require_instances, LoadBalancer};
use crate::pipeline::context::RequestContext;

/// Round-robin selector.
/// Stores an internal cursor to rotate through the current instance list.
#[derive(Debug)]
pub struct RoundRobin {
    service: String,
    provider: Arc<dyn ServiceDiscoveryProvider>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(service: impl Into<String>, provider: Arc<dyn ServiceDiscoveryProvider>) -> Self {
        Self {
            service: service.into(),
            provider,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next instance without touching the request context.
    pub async fn next(&self) -> Result<ServiceInstance, GatewayError> {
        let instances = require_instances(&self.service, self.provider.get_instances().await?)?;
        let index = self.cursor.fetch_add(1, Ordering::Relaxed) % instances.len();
        Ok(instances[index].clone())
    }
}

#[async_trait]
impl LoadBalancer for RoundRobin {
    fn kind(&self) -> &'static str {
        "RoundRobin"
    }

    async fn lease(&self, _ctx: &mut RequestContext) -> Result<ServiceInstance, GatewayError> {
        self.next().await
    }

    fn release(&self, _instance: &ServiceInstance) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticProvider;
    use crate::pipeline::context::test_context;

    fn instances(ports: &[u16]) -> Vec<ServiceInstance> {
        ports.iter().map(|p| ServiceInstance::new("svc", "127.0.0.1", *p)).collect()
    }

    #[tokio::test]
    async fn test_round_robin() {
        let lb = RoundRobin::new("svc", Arc::new(StaticProvider::new(instances(&[8080, 8081, 8082]))));
        let mut ctx = test_context("/", &[]);

        let mut ports = Vec::new();
        for _ in 0..5 {
            ports.push(lb.lease(&mut ctx).await.unwrap().host_and_port.port);
        }
        assert_eq!(ports, vec![8080, 8081, 8082, 8080, 8081]);
    }

    #[tokio::test]
    async fn test_empty_and_null_lists() {
        let mut ctx = test_context("/", &[]);
        let empty = RoundRobin::new("svc", Arc::new(StaticProvider::new(Vec::new())));
        assert!(matches!(empty.lease(&mut ctx).await, Err(GatewayError::ServicesAreEmpty(_))));

        #[derive(Debug)]
        struct NeverListed;

        #[async_trait]
        impl ServiceDiscoveryProvider for NeverListed {
            async fn get_instances(&self) -> Result<Option<crate::discovery::ServiceList>, GatewayError> {
                Ok(None)
            }
        }

        let null = RoundRobin::new("svc", Arc::new(NeverListed));
        assert!(matches!(null.lease(&mut ctx).await, Err(GatewayError::ServicesAreNull(_))));
    }
}
