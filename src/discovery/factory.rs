//! Provider lookup by registry type name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceDiscoveryConfig;
use crate::discovery::{ConsulProvider, PollingServiceDiscovery, ServiceDiscoveryProvider, StaticProvider};
use crate::error::GatewayError;
use crate::routing::Route;

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Builds a provider for one service name.
pub type ProviderCreator = Arc<
    dyn Fn(&ServiceDiscoveryConfig, &str) -> Result<Arc<dyn ServiceDiscoveryProvider>, GatewayError> + Send + Sync,
>;

/// Resolves the discovery provider for a route.
///
/// Routes with static `downstream_hosts` get a [`StaticProvider`]. Routes with
/// a `service_name` use the creator registered under `service_discovery.type`.
#[derive(Clone)]
pub struct DiscoveryProviderFactory {
    config: ServiceDiscoveryConfig,
    creators: HashMap<String, ProviderCreator>,
}

impl fmt::Debug for DiscoveryProviderFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.creators.keys().collect();
        names.sort();
        f.debug_struct("DiscoveryProviderFactory")
            .field("config", &self.config)
            .field("creators", &names)
            .finish()
    }
}

impl DiscoveryProviderFactory {
    /// Factory with the built-in `Consul` and `PollConsul` creators.
    pub fn new(config: ServiceDiscoveryConfig) -> Self {
        let mut factory = Self {
            config,
            creators: HashMap::new(),
        };
        factory.register("Consul", |config, service| {
            Ok(Arc::new(ConsulProvider::new(config, service)?) as Arc<dyn ServiceDiscoveryProvider>)
        });
        factory.register("PollConsul", |config, service| {
            let consul: Arc<dyn ServiceDiscoveryProvider> = Arc::new(ConsulProvider::new(config, service)?);
            let interval = match config.polling_interval_ms {
                0 => DEFAULT_POLL_INTERVAL,
                ms => Duration::from_millis(ms),
            };
            Ok(Arc::new(PollingServiceDiscovery::new(consul, interval)) as Arc<dyn ServiceDiscoveryProvider>)
        });
        factory
    }

    /// Register (or replace) a creator.
    pub fn register<F>(&mut self, name: impl Into<String>, creator: F)
    where
        F: Fn(&ServiceDiscoveryConfig, &str) -> Result<Arc<dyn ServiceDiscoveryProvider>, GatewayError>
            + Send
            + Sync
            + 'static,
    {
        self.creators.insert(name.into(), Arc::new(creator));
    }

    pub fn config(&self) -> &ServiceDiscoveryConfig {
        &self.config
    }

    /// Replace registry settings, keeping registered creators.
    pub fn set_config(&mut self, config: ServiceDiscoveryConfig) {
        self.config = config;
    }

    /// Provider for `route`.
    pub fn get(&self, route: &Route) -> Result<Arc<dyn ServiceDiscoveryProvider>, GatewayError> {
        let Some(service) = &route.service_name else {
            return Ok(Arc::new(StaticProvider::from_hosts(&route.name, &route.downstream_hosts)));
        };

        let kind = self.config.kind.as_str();
        let creator = self
            .creators
            .get(kind)
            .ok_or_else(|| GatewayError::UnableToFindServiceDiscoveryProvider(kind.to_string()))?;
        let provider = creator(&self.config, service)?;

        // PollConsul already caches
        if kind != "PollConsul" && self.config.polling_interval_ms > 0 {
            let interval = Duration::from_millis(self.config.polling_interval_ms);
            return Ok(Arc::new(PollingServiceDiscovery::new(provider, interval)));
        }

        tracing::debug!(route = %route.name, service = %service, provider = kind, "Discovery provider created");
        Ok(provider)
    }
}
