//! Strategy lookup by name.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ServiceDiscoveryConfig;
use crate::discovery::{DiscoveryProviderFactory, ServiceDiscoveryProvider};
use crate::error::GatewayError;
use crate::load_balancer::{CookieStickySessions, LeastConnection, LoadBalancer, NoLoadBalancer, RoundRobin};
use crate::routing::Route;

/// Builds a balancer for a route given its discovery provider.
pub type LoadBalancerCreator = Arc<
    dyn Fn(&Route, Arc<dyn ServiceDiscoveryProvider>) -> Result<Arc<dyn LoadBalancer>, GatewayError> + Send + Sync,
>;

/// Creates balancers from `load_balancer.type`.
#[derive(Clone)]
pub struct LoadBalancerFactory {
    discovery: DiscoveryProviderFactory,
    creators: HashMap<String, LoadBalancerCreator>,
}

impl fmt::Debug for LoadBalancerFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.creators.keys().collect();
        names.sort();
        f.debug_struct("LoadBalancerFactory")
            .field("discovery", &self.discovery)
            .field("creators", &names)
            .finish()
    }
}

fn service_label(route: &Route) -> String {
    route.service_name.clone().unwrap_or_else(|| route.name.clone())
}

impl LoadBalancerFactory {
    /// Factory with the built-in strategies registered.
    pub fn new(discovery: DiscoveryProviderFactory) -> Self {
        let mut factory = Self {
            discovery,
            creators: HashMap::new(),
        };
        factory.register("NoLoadBalancer", |route, provider| {
            Ok(Arc::new(NoLoadBalancer::new(service_label(route), provider)) as Arc<dyn LoadBalancer>)
        });
        factory.register("RoundRobin", |route, provider| {
            Ok(Arc::new(RoundRobin::new(service_label(route), provider)) as Arc<dyn LoadBalancer>)
        });
        factory.register("LeastConnection", |route, provider| {
            Ok(Arc::new(LeastConnection::new(service_label(route), provider)) as Arc<dyn LoadBalancer>)
        });
        factory.register("CookieStickySessions", |route, provider| {
            let options = &route.load_balancer;
            if options.key.trim().is_empty() {
                return Err(GatewayError::InvokingLoadBalancerCreator(
                    "sticky sessions need a cookie key".into(),
                ));
            }
            let inner = Arc::new(RoundRobin::new(service_label(route), provider));
            Ok(Arc::new(CookieStickySessions::new(
                inner,
                options.key.as_str(),
                Duration::from_millis(options.expiry_ms),
            )) as Arc<dyn LoadBalancer>)
        });
        factory
    }

    /// Register (or replace) a strategy.
    pub fn register<F>(&mut self, name: impl Into<String>, creator: F)
    where
        F: Fn(&Route, Arc<dyn ServiceDiscoveryProvider>) -> Result<Arc<dyn LoadBalancer>, GatewayError>
            + Send
            + Sync
            + 'static,
    {
        self.creators.insert(name.into(), Arc::new(creator));
    }

    pub fn discovery_mut(&mut self) -> &mut DiscoveryProviderFactory {
        &mut self.discovery
    }

    pub fn discovery_config(&self) -> &ServiceDiscoveryConfig {
        self.discovery.config()
    }

    /// Same creators, new registry settings.
    pub fn with_discovery_config(&self, config: ServiceDiscoveryConfig) -> Self {
        let mut next = self.clone();
        next.discovery.set_config(config);
        next
    }

    /// Build the balancer for `route`.
    pub fn create(&self, route: &Route) -> Result<Arc<dyn LoadBalancer>, GatewayError> {
        let kind = route.load_balancer.kind.as_str();
        let creator = self
            .creators
            .get(kind)
            .ok_or_else(|| GatewayError::UnableToFindLoadBalancer(kind.to_string()))?;
        let provider = self.discovery.get(route)?;

        creator(route, provider).map_err(|e| match e {
            GatewayError::InvokingLoadBalancerCreator(_) => e,
            other => GatewayError::InvokingLoadBalancerCreator(other.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostAndPortConfig, RouteConfig};

    fn route(kind: &str) -> Route {
        let mut config = RouteConfig::new("/a", "/b", vec![HostAndPortConfig::new("localhost", 5001)]);
        config.load_balancer.kind = kind.into();
        Route::compile(&config).unwrap()
    }

    fn factory() -> LoadBalancerFactory {
        LoadBalancerFactory::new(DiscoveryProviderFactory::new(ServiceDiscoveryConfig::default()))
    }

    #[test]
    fn test_builtin_strategies() {
        let factory = factory();
        for kind in ["NoLoadBalancer", "RoundRobin", "LeastConnection", "CookieStickySessions"] {
            assert_eq!(factory.create(&route(kind)).unwrap().kind(), kind);
        }
    }

    #[test]
    fn test_unknown_strategy() {
        let err = factory().create(&route("Random")).unwrap_err();
        assert_eq!(err, GatewayError::UnableToFindLoadBalancer("Random".into()));
    }

    #[test]
    fn test_creator_failure_is_wrapped() {
        let mut factory = factory();
        factory.register("Broken", |_, _| Err(GatewayError::Internal("boom".into())));
        let err = factory.create(&route("Broken")).unwrap_err();
        assert!(matches!(err, GatewayError::InvokingLoadBalancerCreator(msg) if msg.contains("boom")));

        let mut sticky = route("CookieStickySessions");
        sticky.load_balancer.key = " ".into();
        assert!(matches!(
            factory.create(&sticky),
            Err(GatewayError::InvokingLoadBalancerCreator(_))
        ));
    }
}
