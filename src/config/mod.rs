//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks, route compilation)
//!     → GatewayConfig (validated, immutable)
//!     → compiled into a RouteTable and published to the server
//!
//! On reload:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → new RouteTable built off to the side
//!     → atomic swap of Arc<RouteTable>
//! ```
//!
//! # Design Decisions
//! - Config is immutable once loaded; changes require full reload
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks
//! - Route declaration order is preserved (it is the final tie-break)

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    AuthenticationConfig, AuthenticationOptions, AuthenticationSchemeConfig, CacheOptions, ClaimConfig,
    GatewayConfig, HostAndPortConfig, ListenerConfig, LoadBalancerOptions, ObservabilityConfig, QosOptions, RouteConfig,
    SecurityOptions, ServiceDiscoveryConfig, TimeoutConfig,
};
pub use validation::ValidationError;
