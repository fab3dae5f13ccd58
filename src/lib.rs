//! API gateway library: route matching, service discovery, load balancing
//! and the request pipeline that forwards to downstream services.

pub mod config;
pub mod discovery;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod load_balancer;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
