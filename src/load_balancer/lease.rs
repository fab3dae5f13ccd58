//! Lease ownership.

use std::ops::Deref;
use std::sync::Arc;

use crate::discovery::ServiceInstance;
use crate::load_balancer::LoadBalancer;
use crate::observability::metrics;

/// A RAII guard that releases the leased instance back to its balancer.
#[derive(Debug)]
pub struct LeaseGuard {
    balancer: Arc<dyn LoadBalancer>,
    instance: ServiceInstance,
}

impl LeaseGuard {
    pub fn new(balancer: Arc<dyn LoadBalancer>, instance: ServiceInstance) -> Self {
        metrics::record_lease(balancer.kind(), "lease");
        Self { balancer, instance }
    }

    pub fn instance(&self) -> &ServiceInstance {
        &self.instance
    }
}

impl Deref for LeaseGuard {
    type Target = ServiceInstance;
    fn deref(&self) -> &Self::Target {
        &self.instance
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        self.balancer.release(&self.instance);
        metrics::record_lease(self.balancer.kind(), "release");
        tracing::debug!(instance = %self.instance.host_and_port, "Lease released");
    }
}
