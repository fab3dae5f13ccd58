//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Pipeline stages, balancers, discovery:
//!     → logging.rs (events carrying request_id, route, stage, error_code)
//!     → metrics.rs (request, lease and stage-error counters; latency histogram)
//!
//! Consumers:
//!     → stdout (fmt subscriber)
//!     → Prometheus scrape endpoint, when enabled
//! ```
//!
//! # Design Decisions
//! - The request ID is the join key between log lines of one request
//! - Recording never fails a request

pub mod logging;
pub mod metrics;
