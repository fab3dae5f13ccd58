//! Service discovery subsystem.
//!
//! # Data Flow
//! ```text
//! Route with service_name
//!     → factory.rs (provider type from config → provider instance)
//!     → consul.rs / custom provider (registry query)
//!     → polling.rs (time-boxed cache, last-known-good on registry failure)
//!     → ServiceList consumed by the load balancer
//!
//! Route with static downstream_hosts
//!     → static_list.rs (fixed list)
//! ```
//!
//! # Design Decisions
//! - Instance lists are immutable snapshots (`Arc<Vec<_>>`); a refresh
//!   replaces the whole list, readers never see a partial update
//! - "Never produced a list" (`Ok(None)`) is distinct from "empty list"
//! - Providers only expose `get_instances`; registry wire formats stay inside

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::GatewayError;

pub mod consul;
pub mod factory;
pub mod polling;
pub mod static_list;

pub use consul::ConsulProvider;
pub use factory::{DiscoveryProviderFactory, ProviderCreator};
pub use polling::PollingServiceDiscovery;
pub use static_list::StaticProvider;

/// Immutable snapshot of discovered instances.
pub type ServiceList = Arc<Vec<ServiceInstance>>;

/// Network location of one instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceHostAndPort {
    pub host: String,
    pub port: u16,
}

impl ServiceHostAndPort {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServiceHostAndPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// One addressable backend for a logical service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub name: String,
    pub host_and_port: ServiceHostAndPort,
    pub id: String,
    pub version: String,
    pub tags: Vec<String>,
}

impl ServiceInstance {
    /// Instance with no id, version or tags.
    pub fn new(name: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            name: name.into(),
            host_and_port: ServiceHostAndPort::new(host, port),
            id: String::new(),
            version: String::new(),
            tags: Vec::new(),
        }
    }

    /// Identity used for per-instance load balancer state.
    /// Falls back to `host:port` when the registry supplies no id.
    pub fn lease_key(&self) -> String {
        if self.id.is_empty() {
            self.host_and_port.to_string()
        } else {
            self.id.clone()
        }
    }
}

/// Source of instances for one logical service.
#[async_trait]
pub trait ServiceDiscoveryProvider: Send + Sync + fmt::Debug {
    /// Current instances. `Ok(None)` means the backend has never produced a list.
    async fn get_instances(&self) -> Result<Option<ServiceList>, GatewayError>;
}
