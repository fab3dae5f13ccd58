//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Compile every route so broken templates are rejected at load time
//! - Validate value ranges (ports, schemes, timeouts)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use thiserror::Error;

use crate::config::schema::GatewayConfig;
use crate::routing::RouteTable;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A route could not be compiled.
    #[error("route {route}: {reason}")]
    Route { route: String, reason: String },

    /// A top-level setting is out of range.
    #[error("{field}: {reason}")]
    Field { field: &'static str, reason: String },
}

impl ValidationError {
    pub fn route(route: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Route {
            route: route.into(),
            reason: reason.into(),
        }
    }
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.trim().is_empty() {
        errors.push(ValidationError::Field {
            field: "listener.bind_address",
            reason: "must not be empty".into(),
        });
    }

    if let Some(base_url) = &config.listener.base_url {
        match url::Url::parse(base_url) {
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {}
            _ => errors.push(ValidationError::Field {
                field: "listener.base_url",
                reason: format!("{} is not an absolute http(s) URL", base_url),
            }),
        }
    }

    if config.timeouts.downstream_ms == 0 {
        errors.push(ValidationError::Field {
            field: "timeouts.downstream_ms",
            reason: "must be greater than zero".into(),
        });
    }

    let uses_discovery = config.routes.iter().any(|r| r.service_name.is_some());
    if uses_discovery && config.service_discovery.kind.trim().is_empty() {
        errors.push(ValidationError::Field {
            field: "service_discovery.type",
            reason: "required when a route declares a service_name".into(),
        });
    }

    for route in &config.routes {
        if let Some(auth) = &route.authentication {
            for scheme in &auth.schemes {
                if !config.authentication.schemes.contains_key(scheme) {
                    errors.push(ValidationError::route(
                        &route.upstream_path_template,
                        format!("unknown authentication scheme {}", scheme),
                    ));
                }
            }
        }
    }

    if let Err(route_errors) = RouteTable::from_config(config) {
        errors.extend(route_errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{AuthenticationOptions, HostAndPortConfig, RouteConfig};

    fn route(upstream: &str) -> RouteConfig {
        RouteConfig::new(upstream, "/x", vec![HostAndPortConfig::new("localhost", 80)])
    }

    #[test]
    fn test_valid_config_passes() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("/api/{id}"));
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.routes.push(route("/api/{}"));
        config.routes.push(route("/api/{*rest}/more"));
        let mut no_hosts = route("/ok");
        no_hosts.downstream_hosts.clear();
        config.routes.push(no_hosts);
        config.timeouts.downstream_ms = 0;

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors.len(), 4);
    }

    #[test]
    fn test_base_url_must_be_absolute() {
        let mut config = GatewayConfig::default();
        config.listener.base_url = Some("gateway.local".into());
        assert!(matches!(
            validate_config(&config).unwrap_err()[0],
            ValidationError::Field {
                field: "listener.base_url",
                ..
            }
        ));

        config.listener.base_url = Some("https://api.example.com".into());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_unknown_auth_scheme() {
        let mut config = GatewayConfig::default();
        let mut r = route("/secure");
        r.authentication = Some(AuthenticationOptions {
            schemes: vec!["Missing".into()],
            allowed_scopes: vec![],
        });
        config.routes.push(r);
        let errors = validate_config(&config).unwrap_err();
        assert!(errors[0].to_string().contains("unknown authentication scheme"));
    }
}
