//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming Request (method, host, path, headers)
//!     → router.rs (candidate scan in priority order)
//!     → matcher.rs (method / host / path template / header templates)
//!     → Return: MatchedRoute (route + placeholders) or UnableToFindDownstreamRoute
//!
//! Route Compilation (at startup and on reload):
//!     RouteConfig[]
//!     → Compile templates, claim instructions, IP lists
//!     → Sort by priority and specificity (stable)
//!     → Freeze as immutable RouteTable, publish via ArcSwap
//!
//! Downstream rewrite:
//!     downstream template + placeholders
//!     → replacer.rs
//!     → concrete downstream path
//! ```
//!
//! # Design Decisions
//! - Routes compiled ahead of time, immutable at runtime
//! - No regex in the path hot path (header templates only)
//! - Deterministic: same input always matches same route
//! - First match wins (ordered by priority, then specificity, then declaration)

pub mod matcher;
pub mod replacer;
pub mod router;

pub use matcher::{HeaderTemplate, HostMatcher, PathTemplate, PlaceholderNameAndValue, TemplateError};
pub use router::{MatchedRoute, Route, RouteTable, Router, SecurityPolicy};
