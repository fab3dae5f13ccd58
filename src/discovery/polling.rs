//! Time-boxed cache around any discovery provider.
//!
//! # Design Decisions
//! - One async mutex guards the check-and-refresh critical section; callers
//!   arriving during a refresh wait for it and then read the fresh list
//! - A failed refresh serves the last-known-good list and restarts the interval,
//!   so a down registry is not hammered by every request
//! - Without a previous list, a failed refresh surfaces the provider error

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::discovery::{ServiceDiscoveryProvider, ServiceList};
use crate::error::GatewayError;

#[derive(Debug, Default)]
struct CacheState {
    instances: Option<ServiceList>,
    refreshed_at: Option<Instant>,
}

/// Caches the wrapped provider's list for `interval`.
#[derive(Debug)]
pub struct PollingServiceDiscovery {
    inner: Arc<dyn ServiceDiscoveryProvider>,
    interval: Duration,
    state: Mutex<CacheState>,
}

impl PollingServiceDiscovery {
    pub fn new(inner: Arc<dyn ServiceDiscoveryProvider>, interval: Duration) -> Self {
        Self {
            inner,
            interval,
            state: Mutex::new(CacheState::default()),
        }
    }
}

#[async_trait]
impl ServiceDiscoveryProvider for PollingServiceDiscovery {
    async fn get_instances(&self) -> Result<Option<ServiceList>, GatewayError> {
        let mut state = self.state.lock().await;
        let now = Instant::now();

        if let Some(refreshed_at) = state.refreshed_at {
            if now < refreshed_at + self.interval {
                return Ok(state.instances.clone());
            }
        }

        match self.inner.get_instances().await {
            Ok(instances) => {
                tracing::debug!(
                    count = instances.as_ref().map_or(0, |list| list.len()),
                    "Service discovery cache refreshed"
                );
                state.instances = instances;
                state.refreshed_at = Some(now);
                Ok(state.instances.clone())
            }
            Err(e) => match state.instances.clone() {
                Some(last_known_good) => {
                    tracing::warn!(
                        error = %e,
                        count = last_known_good.len(),
                        "Service discovery refresh failed, serving last known list"
                    );
                    state.refreshed_at = Some(now);
                    Ok(Some(last_known_good))
                }
                None => Err(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::ServiceInstance;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct CountingProvider {
        calls: AtomicUsize,
        failing: AtomicBool,
    }

    #[async_trait]
    impl ServiceDiscoveryProvider for CountingProvider {
        async fn get_instances(&self) -> Result<Option<ServiceList>, GatewayError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing.load(Ordering::SeqCst) {
                return Err(GatewayError::ServiceDiscoveryUnavailable {
                    service: "svc".into(),
                    reason: "down".into(),
                });
            }
            Ok(Some(Arc::new(vec![ServiceInstance::new("svc", format!("h{}", call), 80)])))
        }
    }

    fn polling(inner: &Arc<CountingProvider>) -> PollingServiceDiscovery {
        PollingServiceDiscovery::new(inner.clone(), Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_cached_list_within_interval() {
        let inner = Arc::new(CountingProvider::default());
        let cache = polling(&inner);

        let first = cache.get_instances().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(500)).await;
        let second = cache.get_instances().await.unwrap().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refetches_once_after_interval() {
        let inner = Arc::new(CountingProvider::default());
        let cache = polling(&inner);

        let first = cache.get_instances().await.unwrap().unwrap();
        tokio::time::advance(Duration::from_millis(1001)).await;
        let second = cache.get_instances().await.unwrap().unwrap();
        let third = cache.get_instances().await.unwrap().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(&second, &third));
        assert_eq!(second[0].host_and_port.host, "h1");
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_serves_last_known_good_on_failure() {
        let inner = Arc::new(CountingProvider::default());
        let cache = polling(&inner);

        let first = cache.get_instances().await.unwrap().unwrap();
        inner.failing.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(1500)).await;

        let stale = cache.get_instances().await.unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &stale));
        // the failed refresh restarts the interval
        cache.get_instances().await.unwrap();
        assert_eq!(inner.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_without_history_is_an_error() {
        let inner = Arc::new(CountingProvider::default());
        inner.failing.store(true, Ordering::SeqCst);
        let cache = polling(&inner);
        assert!(matches!(
            cache.get_instances().await,
            Err(GatewayError::ServiceDiscoveryUnavailable { .. })
        ));
    }
}
