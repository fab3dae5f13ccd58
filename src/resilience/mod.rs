//! Resilience subsystem: the quality-of-service wrapper around forwarding.
//!
//! # Data Flow
//! ```text
//! Forward call for a route:
//!     → circuit_breaker.rs (fail fast while open)
//!     → timeouts.rs (enforce route or default deadline)
//!     → outcome recorded on the breaker (errors and 5xx count as failures)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every downstream call has a deadline
//! - No automatic retries
//! - Breakers live per route key; a reload keeps a breaker only while its
//!   route survives with the same QoS options

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Response;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures_util::future::BoxFuture;

use crate::config::QosOptions;
use crate::error::GatewayError;
use crate::routing::{Route, RouteTable};

pub mod circuit_breaker;
pub mod timeouts;

pub use circuit_breaker::{CircuitBreaker, CircuitState};

/// A pending downstream call.
pub type ForwardCall<'a> = BoxFuture<'a, Result<Response<Body>, GatewayError>>;

/// Applies timeout and circuit breaking around a forward call.
pub trait QosProvider: Send + Sync + fmt::Debug {
    fn wrap<'a>(&'a self, route: &'a Route, call: ForwardCall<'a>) -> ForwardCall<'a>;

    /// Reconcile per-route state with a freshly installed route table.
    fn reload(&self, _table: &RouteTable) {}
}

/// Timeout from the route (or the global default) plus an optional breaker.
#[derive(Debug)]
pub struct DefaultQosProvider {
    default_timeout: Duration,
    breakers: DashMap<String, (QosOptions, Arc<CircuitBreaker>)>,
}

impl DefaultQosProvider {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            default_timeout,
            breakers: DashMap::new(),
        }
    }

    fn timeout_for(&self, route: &Route) -> Duration {
        route
            .qos
            .timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(self.default_timeout)
    }

    /// The route's breaker, or `None` when breaking is disabled for it.
    pub fn breaker(&self, route: &Route) -> Option<Arc<CircuitBreaker>> {
        let threshold = route.qos.exceptions_allowed_before_breaking;
        if threshold == 0 {
            return None;
        }
        let fresh = || {
            Arc::new(CircuitBreaker::new(
                threshold,
                Duration::from_millis(route.qos.duration_of_break_ms),
            ))
        };

        let breaker = match self.breakers.entry(route.key.clone()) {
            Entry::Occupied(mut slot) => {
                if slot.get().0 != route.qos {
                    slot.insert((route.qos.clone(), fresh()));
                }
                Arc::clone(&slot.get().1)
            }
            Entry::Vacant(slot) => Arc::clone(&slot.insert((route.qos.clone(), fresh())).1),
        };
        Some(breaker)
    }
}

impl QosProvider for DefaultQosProvider {
    fn wrap<'a>(&'a self, route: &'a Route, call: ForwardCall<'a>) -> ForwardCall<'a> {
        let limit = self.timeout_for(route);
        let breaker = self.breaker(route);

        Box::pin(async move {
            let Some(breaker) = breaker else {
                return timeouts::with_timeout(limit, call).await;
            };

            let attempt = breaker
                .try_acquire()
                .map_err(|_| GatewayError::CircuitBroken(route.name.clone()))?;
            let result = timeouts::with_timeout(limit, call).await;
            match &result {
                Ok(response) if !response.status().is_server_error() => attempt.success(),
                _ => attempt.failure(),
            }
            result
        })
    }

    fn reload(&self, table: &RouteTable) {
        let routes: HashMap<&str, &QosOptions> = table
            .routes()
            .iter()
            .map(|route| (route.key.as_str(), &route.qos))
            .collect();

        let before = self.breakers.len();
        self.breakers
            .retain(|key, (options, _)| routes.get(key.as_str()).is_some_and(|qos| **qos == *options));
        let kept = self.breakers.len();
        tracing::info!(kept, dropped = before - kept, "Circuit breakers reloaded");
    }
}
