//! Route lookup and dispatch.
//!
//! # Responsibilities
//! - Compile route configuration into an immutable, priority-ordered table
//! - Look up the matching route for a request
//! - Return matched route or explicit no-match
//!
//! # Design Decisions
//! - A table is immutable after construction; reloads build a new table and
//!   publish it with a single pointer swap, readers never lock
//! - Order: explicit priority, then specificity (literal segments, fewer
//!   placeholders, no catch-all), then host-bound before host-agnostic, then
//!   declaration order (stable sort)
//! - O(n) scan over candidates (acceptable for typical route counts)
//! - Explicit NotFound error rather than silent default

use std::cmp::Reverse;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::http::{HeaderMap, HeaderName, Method};

use crate::config::{
    AuthenticationOptions, CacheOptions, GatewayConfig, HostAndPortConfig, LoadBalancerOptions, QosOptions,
    RouteConfig, ValidationError,
};
use crate::error::GatewayError;
use crate::pipeline::claims::ClaimToThing;
use crate::pipeline::header_transform::HeaderTransform;
use crate::routing::matcher::{match_headers, HeaderTemplate, HostMatcher, PathTemplate, PlaceholderNameAndValue};

/// IP filtering compiled from [`crate::config::SecurityOptions`].
#[derive(Debug, Clone, Default)]
pub struct SecurityPolicy {
    pub allowed: Vec<IpAddr>,
    pub blocked: Vec<IpAddr>,
}

impl SecurityPolicy {
    pub fn is_empty(&self) -> bool {
        self.allowed.is_empty() && self.blocked.is_empty()
    }
}

/// A compiled, immutable route.
#[derive(Debug)]
pub struct Route {
    /// Name used in logs and metrics.
    pub name: String,
    /// Key identifying per-route load balancer state.
    pub key: String,
    pub upstream: PathTemplate,
    /// Accepted methods; empty means all.
    pub methods: Vec<Method>,
    pub host: Option<HostMatcher>,
    pub header_templates: Vec<HeaderTemplate>,
    pub priority: u32,
    pub downstream_path_template: String,
    pub downstream_scheme: String,
    pub downstream_hosts: Vec<HostAndPortConfig>,
    pub service_name: Option<String>,
    pub load_balancer: LoadBalancerOptions,
    pub authentication: Option<AuthenticationOptions>,
    pub claims_requirement: Vec<(String, String)>,
    pub claims_to_headers: Vec<ClaimToThing>,
    pub claims_to_queries: Vec<ClaimToThing>,
    pub claims_to_path: Vec<ClaimToThing>,
    pub downstream_headers: Vec<(HeaderName, String)>,
    /// Rules applied to the forwarded request's headers.
    pub upstream_header_transform: Vec<HeaderTransform>,
    /// Rules applied to the relayed response's headers.
    pub downstream_header_transform: Vec<HeaderTransform>,
    pub cache: CacheOptions,
    pub qos: QosOptions,
    pub security: SecurityPolicy,
}

impl Route {
    /// Compile one route. The first problem found is reported.
    pub fn compile(config: &RouteConfig) -> Result<Self, ValidationError> {
        let label = if config.name.is_empty() {
            config.upstream_path_template.clone()
        } else {
            config.name.clone()
        };
        let fail = |reason: String| ValidationError::route(label.clone(), reason);

        let upstream = PathTemplate::parse(&config.upstream_path_template, config.case_sensitive)
            .map_err(|e| fail(format!("upstream_path_template: {}", e)))?;

        let methods = config
            .upstream_http_methods
            .iter()
            .map(|m| Method::from_bytes(m.trim().to_ascii_uppercase().as_bytes()))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| fail(format!("upstream_http_methods: {}", e)))?;

        let mut header_templates = Vec::with_capacity(config.upstream_headers.len());
        for (name, template) in &config.upstream_headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| fail(format!("upstream_headers {}: {}", name, e)))?;
            let header = HeaderTemplate::parse(name, template)
                .map_err(|e| fail(format!("upstream_headers {}: {}", name, e)))?;
            header_templates.push(header);
        }

        let mut names = HashSet::new();
        let all_names = upstream
            .placeholder_names()
            .map(str::to_string)
            .chain(header_templates.iter().flat_map(|h| h.placeholder_names().iter().cloned()));
        for name in all_names {
            if !names.insert(name.to_ascii_lowercase()) {
                return Err(fail(format!("placeholder {} declared more than once", name)));
            }
        }

        if config.downstream_path_template.is_empty() || !config.downstream_path_template.starts_with('/') {
            return Err(fail("downstream_path_template must start with '/'".into()));
        }
        if config.downstream_path_template.contains("://") {
            return Err(fail("downstream_path_template must not contain a scheme".into()));
        }

        let scheme = config.downstream_scheme.to_ascii_lowercase();
        if scheme != "http" && scheme != "https" {
            return Err(fail(format!("unsupported downstream_scheme {}", config.downstream_scheme)));
        }

        match (&config.service_name, config.downstream_hosts.is_empty()) {
            (Some(service), _) if service.trim().is_empty() => {
                return Err(fail("service_name must not be empty".into()));
            }
            (None, true) => {
                return Err(fail("either downstream_hosts or service_name is required".into()));
            }
            _ => {}
        }
        if config.downstream_hosts.iter().any(|h| h.host.trim().is_empty() || h.port == 0) {
            return Err(fail("downstream_hosts entries need a host and a non-zero port".into()));
        }

        if config.load_balancer.kind.trim().is_empty() {
            return Err(fail("load_balancer.type must not be empty".into()));
        }

        let parse_claims = |field: &str, entries: &std::collections::BTreeMap<String, String>| {
            entries
                .iter()
                .map(|(key, instruction)| {
                    ClaimToThing::parse(key, instruction).map_err(|e| fail(format!("{} {}: {}", field, key, e)))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        let claims_to_headers = parse_claims("claims_to_headers", &config.claims_to_headers)?;
        let claims_to_queries = parse_claims("claims_to_queries", &config.claims_to_queries)?;
        let claims_to_path = parse_claims("claims_to_path", &config.claims_to_path)?;
        for claim in &claims_to_headers {
            HeaderName::from_bytes(claim.key.as_bytes())
                .map_err(|e| fail(format!("claims_to_headers {}: {}", claim.key, e)))?;
        }

        let downstream_headers = config
            .downstream_headers
            .iter()
            .map(|(name, template)| {
                HeaderName::from_bytes(name.as_bytes())
                    .map(|h| (h, template.clone()))
                    .map_err(|e| fail(format!("downstream_headers {}: {}", name, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        let parse_transforms = |field: &str, entries: &std::collections::BTreeMap<String, String>| {
            entries
                .iter()
                .map(|(name, rule)| {
                    HeaderTransform::parse(name, rule).map_err(|e| fail(format!("{} {}: {}", field, name, e)))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        let upstream_header_transform =
            parse_transforms("upstream_header_transform", &config.upstream_header_transform)?;
        let downstream_header_transform =
            parse_transforms("downstream_header_transform", &config.downstream_header_transform)?;

        if let Some(name) = &config.cache.header {
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| fail(format!("cache.header {}: {}", name, e)))?;
        }
        if config.cache.region.as_deref().is_some_and(|r| r.trim().is_empty()) {
            return Err(fail("cache.region must not be empty".into()));
        }

        let parse_ips = |field: &str, entries: &[String]| {
            entries
                .iter()
                .map(|ip| {
                    ip.trim()
                        .parse::<IpAddr>()
                        .map_err(|e| fail(format!("security.{} {}: {}", field, ip, e)))
                })
                .collect::<Result<Vec<_>, _>>()
        };
        let security = SecurityPolicy {
            allowed: parse_ips("ip_allowed", &config.security.ip_allowed)?,
            blocked: parse_ips("ip_blocked", &config.security.ip_blocked)?,
        };

        let methods_label = if methods.is_empty() {
            "*".to_string()
        } else {
            methods.iter().map(Method::as_str).collect::<Vec<_>>().join(",")
        };
        let target = match &config.service_name {
            Some(service) => service.clone(),
            None => config
                .downstream_hosts
                .iter()
                .map(|h| format!("{}:{}", h.host, h.port))
                .collect::<Vec<_>>()
                .join(","),
        };
        let key = format!(
            "{}|{}|{}|{}|{}",
            label,
            methods_label,
            config.upstream_path_template,
            config.upstream_host.as_deref().unwrap_or(""),
            target
        );

        Ok(Self {
            name: label,
            key,
            upstream,
            methods,
            host: config.upstream_host.as_deref().map(HostMatcher::new),
            header_templates,
            priority: config.priority,
            downstream_path_template: config.downstream_path_template.clone(),
            downstream_scheme: scheme,
            downstream_hosts: config.downstream_hosts.clone(),
            service_name: config.service_name.clone(),
            load_balancer: config.load_balancer.clone(),
            authentication: config.authentication.clone(),
            claims_requirement: config
                .claims_requirement
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            claims_to_headers,
            claims_to_queries,
            claims_to_path,
            downstream_headers,
            upstream_header_transform,
            downstream_header_transform,
            cache: config.cache.clone(),
            qos: config.qos.clone(),
            security,
        })
    }

    /// Output cache region: the configured one or the route name.
    pub fn cache_region(&self) -> &str {
        self.cache.region.as_deref().unwrap_or(&self.name)
    }

    /// Higher sorts first.
    fn sort_key(&self) -> (u32, usize, Reverse<usize>, bool, bool) {
        (
            self.priority,
            self.upstream.literal_segments(),
            Reverse(self.upstream.placeholder_count()),
            !self.upstream.has_catch_all(),
            self.host.is_some(),
        )
    }

    fn accepts_method(&self, method: &Method) -> bool {
        self.methods.is_empty() || self.methods.contains(method)
    }

    fn accepts_host(&self, host: Option<&str>) -> bool {
        self.host.as_ref().map_or(true, |matcher| matcher.matches(host))
    }
}

/// The route chosen for one request plus its captured placeholders.
#[derive(Debug, Clone)]
pub struct MatchedRoute {
    pub route: Arc<Route>,
    /// Path placeholders in template order, then header placeholders.
    pub placeholders: Vec<PlaceholderNameAndValue>,
}

/// An immutable, priority-ordered set of routes.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<Arc<Route>>,
}

impl RouteTable {
    /// Compile every route in the configuration, collecting all errors.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, Vec<ValidationError>> {
        let mut routes = Vec::with_capacity(config.routes.len());
        let mut errors = Vec::new();

        for route in &config.routes {
            match Route::compile(route) {
                Ok(compiled) => routes.push(compiled),
                Err(e) => errors.push(e),
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(Self::from_routes(routes))
    }

    /// Build a table from compiled routes given in declaration order.
    pub fn from_routes(mut routes: Vec<Route>) -> Self {
        // stable: equal keys keep declaration order
        routes.sort_by(|a, b| b.sort_key().cmp(&a.sort_key()));
        Self {
            routes: routes.into_iter().map(Arc::new).collect(),
        }
    }

    /// Routes in evaluation order.
    pub fn routes(&self) -> &[Arc<Route>] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Find the first route matching method, host, path and headers.
    pub fn find(
        &self,
        path: &str,
        method: &Method,
        host: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<MatchedRoute, GatewayError> {
        for route in &self.routes {
            if !route.accepts_method(method) || !route.accepts_host(host) {
                continue;
            }
            let Some(mut placeholders) = route.upstream.matches(path) else {
                continue;
            };
            let Some(header_placeholders) = match_headers(&route.header_templates, headers) else {
                continue;
            };
            placeholders.extend(header_placeholders);

            return Ok(MatchedRoute {
                route: Arc::clone(route),
                placeholders,
            });
        }

        Err(GatewayError::UnableToFindDownstreamRoute {
            path: path.to_string(),
            method: method.to_string(),
        })
    }
}

/// Shared handle to the current route table.
///
/// Readers take a snapshot without locking; reloads publish a new table
/// built off to the side.
#[derive(Debug)]
pub struct Router {
    table: ArcSwap<RouteTable>,
}

impl Router {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: ArcSwap::from_pointee(table),
        }
    }

    /// Compile configuration into a router.
    pub fn from_config(config: &GatewayConfig) -> Result<Self, Vec<ValidationError>> {
        RouteTable::from_config(config).map(Self::new)
    }

    /// Current table.
    pub fn snapshot(&self) -> Arc<RouteTable> {
        self.table.load_full()
    }

    /// Publish a new table. In-flight requests keep the snapshot they started with.
    pub fn install(&self, table: RouteTable) {
        let count = table.len();
        self.table.store(Arc::new(table));
        tracing::info!(routes = count, "Route table installed");
    }

    /// Resolve a request against the current table.
    pub fn find_route(
        &self,
        path: &str,
        method: &Method,
        host: Option<&str>,
        headers: &HeaderMap,
    ) -> Result<MatchedRoute, GatewayError> {
        self.table.load().find(path, method, host, headers)
    }
}
