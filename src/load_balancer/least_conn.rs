//! Least Connections load balancing strategy.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;

use crate::discovery::{ServiceDiscoveryProvider, ServiceInstance};
use crate::error::GatewayError;
use crate::load_balancer::{require_instances, LoadBalancer};
use crate::pipeline::context::RequestContext;

/// Least connections selector.
/// Selects the instance with the fewest in-flight leases.
#[derive(Debug)]
pub struct LeastConnection {
    service: String,
    provider: Arc<dyn ServiceDiscoveryProvider>,
    /// lease key -> in-flight leases
    in_flight: Mutex<HashMap<String, usize>>,
}

impl LeastConnection {
    pub fn new(service: impl Into<String>, provider: Arc<dyn ServiceDiscoveryProvider>) -> Self {
        Self {
            service: service.into(),
            provider,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Current in-flight count for an instance.
    pub fn in_flight(&self, instance: &ServiceInstance) -> usize {
        let counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        counts.get(&instance.lease_key()).copied().unwrap_or(0)
    }
}

#[async_trait]
impl LoadBalancer for LeastConnection {
    fn kind(&self) -> &'static str {
        "LeastConnection"
    }

    async fn lease(&self, _ctx: &mut RequestContext) -> Result<ServiceInstance, GatewayError> {
        let instances = require_instances(&self.service, self.provider.get_instances().await?)?;
        let keys: Vec<String> = instances.iter().map(ServiceInstance::lease_key).collect();

        let mut counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        // instances gone from the list no longer need counters
        counts.retain(|key, _| keys.contains(key));

        // In case of tie, the first one is selected (stability)
        let (index, key) = keys
            .iter()
            .enumerate()
            .min_by_key(|(_, key)| counts.get(*key).copied().unwrap_or(0))
            .ok_or_else(|| GatewayError::ServicesAreEmpty(self.service.clone()))?;
        *counts.entry(key.clone()).or_insert(0) += 1;

        Ok(instances[index].clone())
    }

    fn release(&self, instance: &ServiceInstance) {
        let mut counts = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(count) = counts.get_mut(&instance.lease_key()) {
            *count = count.saturating_sub(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::StaticProvider;
    use crate::pipeline::context::test_context;

    fn balancer() -> LeastConnection {
        let instances = vec![
            ServiceInstance::new("svc", "127.0.0.1", 8080),
            ServiceInstance::new("svc", "127.0.0.1", 8081),
        ];
        LeastConnection::new("svc", Arc::new(StaticProvider::new(instances)))
    }

    #[tokio::test]
    async fn test_least_conn() {
        let lb = balancer();
        let mut ctx = test_context("/", &[]);

        let first = lb.lease(&mut ctx).await.unwrap();
        let second = lb.lease(&mut ctx).await.unwrap();
        assert_eq!(first.host_and_port.port, 8080);
        assert_eq!(second.host_and_port.port, 8081);

        // both at 1, tie goes to list order
        let third = lb.lease(&mut ctx).await.unwrap();
        assert_eq!(third.host_and_port.port, 8080);
        assert_eq!(lb.in_flight(&first), 2);

        // releasing 8080 twice makes it the minimum
        lb.release(&first);
        lb.release(&third);
        let fourth = lb.lease(&mut ctx).await.unwrap();
        assert_eq!(fourth.host_and_port.port, 8080);

        lb.release(&second);
        lb.release(&fourth);
        assert_eq!(lb.in_flight(&first), 0);
        assert_eq!(lb.in_flight(&second), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_leases_settle_to_zero() {
        let lb = Arc::new(balancer());
        let mut tasks = Vec::new();
        for _ in 0..8 {
            let lb = lb.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..50 {
                    let mut ctx = test_context("/", &[]);
                    let instance = lb.lease(&mut ctx).await.unwrap();
                    tokio::task::yield_now().await;
                    lb.release(&instance);
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(lb.in_flight(&ServiceInstance::new("svc", "127.0.0.1", 8080)), 0);
        assert_eq!(lb.in_flight(&ServiceInstance::new("svc", "127.0.0.1", 8081)), 0);
    }

    #[tokio::test]
    async fn test_release_never_underflows() {
        let lb = balancer();
        let unknown = ServiceInstance::new("svc", "10.0.0.9", 1);
        lb.release(&unknown);
        assert_eq!(lb.in_flight(&unknown), 0);
    }
}
