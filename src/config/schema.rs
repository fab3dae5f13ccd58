//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Route definitions, in declaration order.
    ///
    /// Order matters: among routes of equal priority and specificity the
    /// one declared first wins.
    pub routes: Vec<RouteConfig>,

    /// Global service discovery registry settings.
    pub service_discovery: ServiceDiscoveryConfig,

    /// Authentication schemes available to routes.
    pub authentication: AuthenticationConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Public URL of the gateway used for `{BaseUrl}`. Derived from the
    /// request's Host header when unset.
    pub base_url: Option<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            base_url: None,
        }
    }
}

/// A single route: how an upstream request shape maps to a downstream target.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RouteConfig {
    /// Route identifier for logging/metrics. Generated from the templates when empty.
    #[serde(default)]
    pub name: String,

    /// Upstream path template, e.g. `/api/{id}` or `/files/{*rest}`.
    pub upstream_path_template: String,

    /// Accepted HTTP methods. Empty means all methods.
    #[serde(default)]
    pub upstream_http_methods: Vec<String>,

    /// Host header to match.
    #[serde(default)]
    pub upstream_host: Option<String>,

    /// Header name -> template (e.g. `"x-api-version" = "v{version}"`).
    #[serde(default)]
    pub upstream_headers: BTreeMap<String, String>,

    /// Match the upstream path case-sensitively.
    #[serde(default)]
    pub case_sensitive: bool,

    /// Route priority (higher = checked first).
    #[serde(default = "default_priority")]
    pub priority: u32,

    /// Downstream path template, e.g. `/service/{id}`.
    pub downstream_path_template: String,

    /// Downstream scheme.
    #[serde(default = "default_scheme")]
    pub downstream_scheme: String,

    /// Static downstream hosts. Used when no service name is set.
    #[serde(default)]
    pub downstream_hosts: Vec<HostAndPortConfig>,

    /// Logical service name resolved through service discovery.
    #[serde(default)]
    pub service_name: Option<String>,

    /// Load balancing strategy for this route.
    #[serde(default)]
    pub load_balancer: LoadBalancerOptions,

    /// Authentication requirements. `None` means anonymous access.
    #[serde(default)]
    pub authentication: Option<AuthenticationOptions>,

    /// Claim type -> required value (or `{placeholder}`).
    #[serde(default)]
    pub claims_requirement: BTreeMap<String, String>,

    /// Header name -> claim instruction (e.g. `Claims[sub] > value[1] > |`).
    #[serde(default)]
    pub claims_to_headers: BTreeMap<String, String>,

    /// Query key -> claim instruction.
    #[serde(default)]
    pub claims_to_queries: BTreeMap<String, String>,

    /// Downstream placeholder name -> claim instruction.
    #[serde(default)]
    pub claims_to_path: BTreeMap<String, String>,

    /// Header name -> value template, set on the downstream request.
    #[serde(default)]
    pub downstream_headers: BTreeMap<String, String>,

    /// Request header rules: `"find, replace"` rewrites, any other value sets.
    #[serde(default)]
    pub upstream_header_transform: BTreeMap<String, String>,

    /// Response header rules, same syntax. `{DownstreamBaseUrl}` is available.
    #[serde(default)]
    pub downstream_header_transform: BTreeMap<String, String>,

    /// Output caching.
    #[serde(default)]
    pub cache: CacheOptions,

    /// Timeout and circuit breaking.
    #[serde(default)]
    pub qos: QosOptions,

    /// IP allow/block lists.
    #[serde(default)]
    pub security: SecurityOptions,
}

fn default_priority() -> u32 {
    1
}

fn default_scheme() -> String {
    "http".to_string()
}

impl RouteConfig {
    /// Minimal route forwarding `upstream` to `downstream` on the given static hosts.
    pub fn new(
        upstream: impl Into<String>,
        downstream: impl Into<String>,
        hosts: Vec<HostAndPortConfig>,
    ) -> Self {
        Self {
            name: String::new(),
            upstream_path_template: upstream.into(),
            upstream_http_methods: Vec::new(),
            upstream_host: None,
            upstream_headers: BTreeMap::new(),
            case_sensitive: false,
            priority: default_priority(),
            downstream_path_template: downstream.into(),
            downstream_scheme: default_scheme(),
            downstream_hosts: hosts,
            service_name: None,
            load_balancer: LoadBalancerOptions::default(),
            authentication: None,
            claims_requirement: BTreeMap::new(),
            claims_to_headers: BTreeMap::new(),
            claims_to_queries: BTreeMap::new(),
            claims_to_path: BTreeMap::new(),
            downstream_headers: BTreeMap::new(),
            upstream_header_transform: BTreeMap::new(),
            downstream_header_transform: BTreeMap::new(),
            cache: CacheOptions::default(),
            qos: QosOptions::default(),
            security: SecurityOptions::default(),
        }
    }

    /// Restrict the route to the given methods.
    pub fn with_methods(mut self, methods: &[&str]) -> Self {
        self.upstream_http_methods = methods.iter().map(|m| m.to_string()).collect();
        self
    }
}

/// A static downstream host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HostAndPortConfig {
    pub host: String,
    pub port: u16,
}

impl HostAndPortConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Load balancer selection for a route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadBalancerOptions {
    /// Registered strategy name: `RoundRobin`, `LeastConnection`,
    /// `CookieStickySessions`, `NoLoadBalancer` or a custom one.
    #[serde(rename = "type")]
    pub kind: String,

    /// Session cookie name for sticky sessions.
    pub key: String,

    /// Sticky session lifetime in milliseconds.
    pub expiry_ms: u64,
}

impl Default for LoadBalancerOptions {
    fn default() -> Self {
        Self {
            kind: "NoLoadBalancer".to_string(),
            key: "gateway-session".to_string(),
            expiry_ms: 20 * 60 * 1000,
        }
    }
}

/// Authentication requirements for a route.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationOptions {
    /// Scheme names tried in order; the first success wins.
    pub schemes: Vec<String>,

    /// Scopes accepted on this route. Empty means any scope.
    pub allowed_scopes: Vec<String>,
}

/// Quality-of-service options for a route.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct QosOptions {
    /// Downstream call timeout. Falls back to `timeouts.downstream_ms`.
    pub timeout_ms: Option<u64>,

    /// Consecutive failures before the circuit opens. 0 disables the breaker.
    pub exceptions_allowed_before_breaking: u32,

    /// How long the circuit stays open.
    pub duration_of_break_ms: u64,
}

impl Default for QosOptions {
    fn default() -> Self {
        Self {
            timeout_ms: None,
            exceptions_allowed_before_breaking: 0,
            duration_of_break_ms: 5_000,
        }
    }
}

/// Output caching for a route.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheOptions {
    /// Entry lifetime in seconds. 0 disables caching.
    pub ttl_secs: u64,

    /// Cache region. Defaults to the route name.
    pub region: Option<String>,

    /// Request header whose value becomes part of the key.
    pub header: Option<String>,
}

/// IP filtering for a route.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityOptions {
    /// If non-empty, only these addresses are admitted.
    pub ip_allowed: Vec<String>,

    /// These addresses are always rejected.
    pub ip_blocked: Vec<String>,
}

/// Service discovery registry configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ServiceDiscoveryConfig {
    /// Provider type: `Consul`, `PollConsul` or a registered custom name.
    #[serde(rename = "type")]
    pub kind: String,

    pub scheme: String,
    pub host: String,
    pub port: u16,

    /// Registry ACL token.
    pub token: Option<String>,

    /// Cache lifetime for discovered instances. 0 disables caching.
    pub polling_interval_ms: u64,
}

impl Default for ServiceDiscoveryConfig {
    fn default() -> Self {
        Self {
            kind: "Consul".to_string(),
            scheme: "http".to_string(),
            host: "localhost".to_string(),
            port: 8500,
            token: None,
            polling_interval_ms: 0,
        }
    }
}

/// Authentication schemes keyed by name.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationConfig {
    pub schemes: BTreeMap<String, AuthenticationSchemeConfig>,
}

/// A bearer-token scheme: token -> claims of the principal it identifies.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthenticationSchemeConfig {
    pub tokens: BTreeMap<String, Vec<ClaimConfig>>,
}

/// A single claim.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClaimConfig {
    #[serde(rename = "type")]
    pub claim_type: String,
    pub value: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Outer request timeout in seconds (safety net around the whole pipeline).
    pub request_secs: u64,

    /// Default downstream call timeout in milliseconds.
    pub downstream_ms: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 100,
            downstream_ms: 90_000,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
