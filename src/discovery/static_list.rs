//! Fixed, configuration-supplied instance list.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::HostAndPortConfig;
use crate::discovery::{ServiceDiscoveryProvider, ServiceInstance, ServiceList};
use crate::error::GatewayError;

/// Always returns the same list.
#[derive(Debug, Clone)]
pub struct StaticProvider {
    instances: ServiceList,
}

impl StaticProvider {
    pub fn new(instances: Vec<ServiceInstance>) -> Self {
        Self {
            instances: Arc::new(instances),
        }
    }

    /// Build from a route's `downstream_hosts`.
    pub fn from_hosts(service: &str, hosts: &[HostAndPortConfig]) -> Self {
        Self::new(
            hosts
                .iter()
                .map(|h| ServiceInstance::new(service, h.host.as_str(), h.port))
                .collect(),
        )
    }
}

#[async_trait]
impl ServiceDiscoveryProvider for StaticProvider {
    async fn get_instances(&self) -> Result<Option<ServiceList>, GatewayError> {
        Ok(Some(Arc::clone(&self.instances)))
    }
}
