//! HTTP front end.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, request ID, timeout, tracing layers)
//!     → request.rs (request ID)
//!     → pipeline (route, authenticate, lease, forward)
//!     → response relayed to the client
//! ```

pub mod request;
pub mod server;

pub use request::{request_id, MakeRequestUuid, X_REQUEST_ID};
pub use server::HttpServer;
