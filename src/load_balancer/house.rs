//! One balancer per route key.
//!
//! # Responsibilities
//! - Create a route's balancer on first use and hand the same instance to
//!   every later request for that key
//! - Keep balancers across a configuration reload when their route survives
//!   unchanged, so sticky pins and in-flight counts carry over
//!
//! # Design Decisions
//! - DashMap keeps per-key lookups independent of each other
//! - The factory sits behind ArcSwap so a reload can swap registry settings
//!   without blocking lookups
//! - A balancer is tied to the options it was built from; a route that
//!   arrives with different options gets a fresh one

use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::config::{LoadBalancerOptions, ServiceDiscoveryConfig};
use crate::error::GatewayError;
use crate::load_balancer::{LoadBalancer, LoadBalancerFactory};
use crate::routing::{Route, RouteTable};

#[derive(Debug)]
struct Housed {
    options: LoadBalancerOptions,
    balancer: Arc<dyn LoadBalancer>,
}

#[derive(Debug)]
pub struct LoadBalancerHouse {
    factory: ArcSwap<LoadBalancerFactory>,
    balancers: DashMap<String, Housed>,
}

impl LoadBalancerHouse {
    pub fn new(factory: LoadBalancerFactory) -> Self {
        Self {
            factory: ArcSwap::from_pointee(factory),
            balancers: DashMap::new(),
        }
    }

    /// Balancer for `route`, created on first use or when its options changed.
    pub fn get(&self, route: &Route) -> Result<Arc<dyn LoadBalancer>, GatewayError> {
        if let Some(existing) = self.balancers.get(&route.key) {
            if existing.options == route.load_balancer {
                return Ok(Arc::clone(&existing.balancer));
            }
        }

        let created = self.factory.load().create(route)?;
        tracing::debug!(route = %route.name, strategy = created.kind(), "Load balancer created");
        let housed = Housed {
            options: route.load_balancer.clone(),
            balancer: created,
        };

        match self.balancers.entry(route.key.clone()) {
            Entry::Occupied(mut slot) => {
                // another request may have won the race with the same options
                if slot.get().options != route.load_balancer {
                    slot.insert(housed);
                }
                Ok(Arc::clone(&slot.get().balancer))
            }
            Entry::Vacant(slot) => Ok(Arc::clone(&slot.insert(housed).balancer)),
        }
    }

    /// Apply new registry settings and drop balancers whose route is gone,
    /// whose options changed, or whose registry settings changed.
    pub fn reload(&self, discovery: ServiceDiscoveryConfig, table: &RouteTable) {
        let registry_changed = self.factory.load().discovery_config() != &discovery;
        if registry_changed {
            let next = self.factory.load().with_discovery_config(discovery);
            self.factory.store(Arc::new(next));
        }

        let routes: HashMap<&str, &Arc<Route>> = table
            .routes()
            .iter()
            .map(|route| (route.key.as_str(), route))
            .collect();

        let before = self.balancers.len();
        self.balancers.retain(|key, housed| match routes.get(key.as_str()) {
            Some(route) => {
                housed.options == route.load_balancer && !(registry_changed && route.service_name.is_some())
            }
            None => false,
        });
        let kept = self.balancers.len();

        tracing::info!(kept, dropped = before - kept, registry_changed, "Load balancers reloaded");
    }

    pub fn len(&self) -> usize {
        self.balancers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balancers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostAndPortConfig, RouteConfig};
    use crate::discovery::DiscoveryProviderFactory;
    use crate::pipeline::context::test_context;

    fn house() -> LoadBalancerHouse {
        LoadBalancerHouse::new(LoadBalancerFactory::new(DiscoveryProviderFactory::new(
            ServiceDiscoveryConfig::default(),
        )))
    }

    fn route_config(name: &str) -> RouteConfig {
        let mut config = RouteConfig::new("/a", "/b", vec![HostAndPortConfig::new("localhost", 5001)]);
        config.name = name.into();
        config.load_balancer.kind = "RoundRobin".into();
        config
    }

    fn route(name: &str) -> Route {
        Route::compile(&route_config(name)).unwrap()
    }

    fn table(configs: &[RouteConfig]) -> RouteTable {
        RouteTable::from_routes(configs.iter().map(|c| Route::compile(c).unwrap()).collect())
    }

    #[test]
    fn test_same_key_same_balancer() {
        let house = house();
        let a = house.get(&route("a")).unwrap();
        let again = house.get(&route("a")).unwrap();
        let b = house.get(&route("b")).unwrap();
        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(house.len(), 2);
    }

    #[test]
    fn test_identical_reload_keeps_balancer() {
        let house = house();
        let before = house.get(&route("a")).unwrap();
        house.reload(ServiceDiscoveryConfig::default(), &table(&[route_config("a")]));
        assert_eq!(house.len(), 1);
        let after = house.get(&route("a")).unwrap();
        assert!(Arc::ptr_eq(&before, &after));
    }

    #[test]
    fn test_reload_drops_removed_and_changed_routes() {
        let house = house();
        let kept = house.get(&route("a")).unwrap();
        house.get(&route("b")).unwrap();
        let old_c = house.get(&route("c")).unwrap();

        let mut changed = route_config("c");
        changed.load_balancer.kind = "LeastConnection".into();
        house.reload(ServiceDiscoveryConfig::default(), &table(&[route_config("a"), changed.clone()]));
        assert_eq!(house.len(), 1);

        assert!(Arc::ptr_eq(&kept, &house.get(&route("a")).unwrap()));
        let new_c = house.get(&Route::compile(&changed).unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&old_c, &new_c));
        assert_eq!(new_c.kind(), "LeastConnection");
    }

    #[test]
    fn test_changed_options_replace_balancer_without_reload() {
        let house = house();
        let before = house.get(&route("a")).unwrap();
        let mut changed = route_config("a");
        changed.load_balancer.kind = "LeastConnection".into();
        let after = house.get(&Route::compile(&changed).unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(house.len(), 1);
    }

    #[test]
    fn test_registry_change_drops_discovered_routes_only() {
        let house = house();
        let static_route = house.get(&route("static")).unwrap();

        let mut discovered = route_config("orders");
        discovered.downstream_hosts.clear();
        discovered.service_name = Some("orders".into());
        let discovered_route = Route::compile(&discovered).unwrap();
        house.get(&discovered_route).unwrap();
        assert_eq!(house.len(), 2);

        let registry = ServiceDiscoveryConfig {
            host: "registry.internal".into(),
            ..Default::default()
        };
        house.reload(registry, &table(&[route_config("static"), discovered]));
        assert_eq!(house.len(), 1);
        assert!(Arc::ptr_eq(&static_route, &house.get(&route("static")).unwrap()));
    }

    #[tokio::test]
    async fn test_sticky_pins_survive_identical_reload() {
        let house = house();
        let mut config = RouteConfig::new(
            "/cart",
            "/cart",
            vec![
                HostAndPortConfig::new("localhost", 5001),
                HostAndPortConfig::new("localhost", 5002),
            ],
        );
        config.load_balancer.kind = "CookieStickySessions".into();
        config.load_balancer.key = "sid".into();
        let sticky = Route::compile(&config).unwrap();

        let balancer = house.get(&sticky).unwrap();
        balancer
            .lease(&mut test_context("/cart", &[("cookie", "sid=one")]))
            .await
            .unwrap();
        let pinned = balancer
            .lease(&mut test_context("/cart", &[("cookie", "sid=two")]))
            .await
            .unwrap();

        house.reload(ServiceDiscoveryConfig::default(), &table(&[config]));

        let balancer = house.get(&sticky).unwrap();
        let again = balancer
            .lease(&mut test_context("/cart", &[("cookie", "sid=two")]))
            .await
            .unwrap();
        assert_eq!(again, pinned);
    }

    #[test]
    fn test_errors_are_not_cached() {
        let house = house();
        let mut broken = route("broken");
        broken.load_balancer.kind = "Missing".into();
        assert!(house.get(&broken).is_err());
        assert!(house.is_empty());
    }
}
