//! Load balancing subsystem.
//!
//! # Data Flow
//! ```text
//! Route matched → route key identified
//!     → house.rs (one balancer per route key, created lazily)
//!     → factory.rs (strategy name → creator, discovery provider attached)
//!     → Apply load balancing algorithm:
//!         - round_robin.rs (rotate through instances)
//!         - least_conn.rs (pick instance with fewest in-flight leases)
//!         - sticky.rs (cookie → instance, falls back to round robin)
//!         - no_op.rs (single configured host)
//!     → lease.rs (guard that releases on drop)
//! ```
//!
//! # Design Decisions
//! - Balancers read the current instance list from their discovery provider
//!   on every lease; the list is never cached here
//! - State is per balancer (per route key), never global
//! - Locks guard state mutation only and are never held across an await
//! - Release is tied to a guard's `Drop`, so it happens exactly once on every path

use std::fmt;

use async_trait::async_trait;

use crate::discovery::{ServiceInstance, ServiceList};
use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;

pub mod factory;
pub mod house;
pub mod lease;
pub mod least_conn;
pub mod no_op;
pub mod round_robin;
pub mod sticky;

pub use factory::{LoadBalancerCreator, LoadBalancerFactory};
pub use house::LoadBalancerHouse;
pub use lease::LeaseGuard;
pub use least_conn::LeastConnection;
pub use no_op::NoLoadBalancer;
pub use round_robin::RoundRobin;
pub use sticky::CookieStickySessions;

/// Picks one instance per request.
#[async_trait]
pub trait LoadBalancer: Send + Sync + fmt::Debug {
    /// Registered strategy name.
    fn kind(&self) -> &'static str;

    /// Choose an instance for this request.
    async fn lease(&self, ctx: &mut RequestContext) -> Result<ServiceInstance, GatewayError>;

    /// Return an instance obtained from [`LoadBalancer::lease`].
    fn release(&self, instance: &ServiceInstance);
}

/// Reject a missing or empty instance list.
pub(crate) fn require_instances(service: &str, instances: Option<ServiceList>) -> Result<ServiceList, GatewayError> {
    match instances {
        None => Err(GatewayError::ServicesAreNull(format!(
            "service discovery returned no list for {}",
            service
        ))),
        Some(list) if list.is_empty() => Err(GatewayError::ServicesAreEmpty(format!(
            "there were no services in {}",
            service
        ))),
        Some(list) => Ok(list),
    }
}
