//! Cookie sticky sessions over round robin.
//!
//! # Design Decisions
//! - The session map lock is taken twice per miss (lookup, then record) and
//!   released in between so the round-robin lease can await discovery
//! - Expired sessions are evicted when looked up, there is no sweeper
//! - A caller without the cookie gets a fresh session id in `Set-Cookie`

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use uuid::Uuid;

use crate::discovery::ServiceInstance;
use crate::error::GatewayError;
use crate::load_balancer::{LoadBalancer, RoundRobin};
use crate::pipeline::context::RequestContext;

#[derive(Debug, Clone)]
struct StickySession {
    instance: ServiceInstance,
    expires_at: Instant,
}

/// Binds a session cookie to the instance it was first routed to.
#[derive(Debug)]
pub struct CookieStickySessions {
    inner: Arc<RoundRobin>,
    cookie: String,
    ttl: Duration,
    sessions: Mutex<HashMap<String, StickySession>>,
}

impl CookieStickySessions {
    pub fn new(inner: Arc<RoundRobin>, cookie: impl Into<String>, ttl: Duration) -> Self {
        Self {
            inner,
            cookie: cookie.into(),
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Live session for `id`, refreshing its expiry.
    fn lookup(&self, id: &str) -> Option<ServiceInstance> {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match sessions.get_mut(id) {
            Some(session) if session.expires_at > now => {
                session.expires_at = now + self.ttl;
                Some(session.instance.clone())
            }
            Some(_) => {
                sessions.remove(id);
                tracing::debug!(session = %id, "Sticky session expired");
                None
            }
            None => None,
        }
    }

    fn record(&self, id: String, instance: ServiceInstance) {
        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        sessions.insert(
            id,
            StickySession {
                instance,
                expires_at: Instant::now() + self.ttl,
            },
        );
    }
}

#[async_trait]
impl LoadBalancer for CookieStickySessions {
    fn kind(&self) -> &'static str {
        "CookieStickySessions"
    }

    async fn lease(&self, ctx: &mut RequestContext) -> Result<ServiceInstance, GatewayError> {
        let presented = ctx.cookie(&self.cookie).map(str::to_string);

        if let Some(id) = presented.as_deref() {
            if let Some(instance) = self.lookup(id) {
                return Ok(instance);
            }
        }

        let instance = self.inner.next().await?;
        let id = presented.unwrap_or_else(|| Uuid::new_v4().to_string());
        ctx.set_cookie(&self.cookie, &id)?;
        tracing::debug!(
            request_id = %ctx.request_id,
            session = %id,
            instance = %instance.host_and_port,
            "Sticky session bound"
        );
        self.record(id, instance.clone());
        Ok(instance)
    }

    fn release(&self, instance: &ServiceInstance) {
        self.inner.release(instance);
    }
}
