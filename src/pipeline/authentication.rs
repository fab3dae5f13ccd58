//! Authentication collaborator and the stage that invokes it.
//!
//! The gateway only consumes the outcome: a [`Principal`] with its claims, or
//! a failure. [`StaticTokenAuthenticator`] is the built-in implementation,
//! mapping configured bearer tokens to claim sets.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{header, HeaderMap};

use crate::config::AuthenticationConfig;
use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;

/// A single claim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Claim {
    pub claim_type: String,
    pub value: String,
}

impl Claim {
    pub fn new(claim_type: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            claim_type: claim_type.into(),
            value: value.into(),
        }
    }
}

/// The authenticated caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Scheme that authenticated the caller.
    pub scheme: String,
    pub claims: Vec<Claim>,
}

impl Principal {
    pub fn new(scheme: impl Into<String>, claims: Vec<Claim>) -> Self {
        Self {
            scheme: scheme.into(),
            claims,
        }
    }

    /// Values of every claim of the given type, in order.
    pub fn values<'a>(&'a self, claim_type: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.claims
            .iter()
            .filter(move |c| c.claim_type == claim_type)
            .map(|c| c.value.as_str())
    }
}

/// Authenticates a request against a list of scheme names.
#[async_trait]
pub trait Authenticator: Send + Sync + fmt::Debug {
    /// Try the schemes in order; the first success wins.
    async fn authenticate(&self, schemes: &[String], headers: &HeaderMap) -> Result<Principal, GatewayError>;
}

/// Bearer tokens from configuration, per scheme.
#[derive(Debug, Default)]
pub struct StaticTokenAuthenticator {
    schemes: BTreeMap<String, HashMap<String, Vec<Claim>>>,
}

impl StaticTokenAuthenticator {
    pub fn from_config(config: &AuthenticationConfig) -> Self {
        let schemes = config
            .schemes
            .iter()
            .map(|(name, scheme)| {
                let tokens = scheme
                    .tokens
                    .iter()
                    .map(|(token, claims)| {
                        let claims = claims.iter().map(|c| Claim::new(c.claim_type.as_str(), c.value.as_str()));
                        (token.clone(), claims.collect())
                    })
                    .collect();
                (name.clone(), tokens)
            })
            .collect();
        Self { schemes }
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (kind, token) = value.split_once(' ')?;
    kind.eq_ignore_ascii_case("bearer").then(|| token.trim())
}

#[async_trait]
impl Authenticator for StaticTokenAuthenticator {
    async fn authenticate(&self, schemes: &[String], headers: &HeaderMap) -> Result<Principal, GatewayError> {
        let token = bearer_token(headers).ok_or_else(|| GatewayError::Unauthenticated("missing bearer token".into()))?;

        for scheme in schemes {
            let Some(tokens) = self.schemes.get(scheme) else {
                tracing::warn!(scheme = %scheme, "Authentication scheme is not configured");
                continue;
            };
            if let Some(claims) = tokens.get(token) {
                return Ok(Principal::new(scheme.as_str(), claims.clone()));
            }
        }

        Err(GatewayError::Unauthenticated(format!(
            "token rejected by schemes {}",
            schemes.join(", ")
        )))
    }
}

/// Authenticates callers of routes that declare authentication options.
#[derive(Debug)]
pub struct AuthenticationStage {
    authenticator: Arc<dyn Authenticator>,
}

impl AuthenticationStage {
    pub fn new(authenticator: Arc<dyn Authenticator>) -> Self {
        Self { authenticator }
    }
}

#[async_trait]
impl PipelineStage for AuthenticationStage {
    fn name(&self) -> &'static str {
        "authentication"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let Some(options) = route.authentication.as_ref().filter(|o| !o.schemes.is_empty()) else {
            return Ok(());
        };

        let principal = self
            .authenticator
            .authenticate(&options.schemes, &ctx.upstream.headers)
            .await?;
        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.name,
            scheme = %principal.scheme,
            "Caller authenticated"
        );
        ctx.principal = Some(principal);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AuthenticationSchemeConfig, ClaimConfig};
    use axum::http::HeaderValue;

    fn authenticator() -> StaticTokenAuthenticator {
        let mut scheme = AuthenticationSchemeConfig::default();
        scheme.tokens.insert(
            "secret".into(),
            vec![ClaimConfig {
                claim_type: "sub".into(),
                value: "42".into(),
            }],
        );
        let mut config = AuthenticationConfig::default();
        config.schemes.insert("Bearer".into(), scheme);
        StaticTokenAuthenticator::from_config(&config)
    }

    fn headers(auth: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(auth).unwrap());
        headers
    }

    #[tokio::test]
    async fn test_known_token_yields_principal() {
        let principal = authenticator()
            .authenticate(&["Other".into(), "Bearer".into()], &headers("Bearer secret"))
            .await
            .unwrap();
        assert_eq!(principal.scheme, "Bearer");
        assert_eq!(principal.values("sub").collect::<Vec<_>>(), vec!["42"]);
    }

    #[tokio::test]
    async fn test_missing_or_unknown_token() {
        let auth = authenticator();
        let schemes = vec!["Bearer".to_string()];
        assert!(matches!(
            auth.authenticate(&schemes, &HeaderMap::new()).await,
            Err(GatewayError::Unauthenticated(_))
        ));
        assert!(matches!(
            auth.authenticate(&schemes, &headers("Bearer nope")).await,
            Err(GatewayError::Unauthenticated(_))
        ));
        assert!(matches!(
            auth.authenticate(&schemes, &headers("Basic secret")).await,
            Err(GatewayError::Unauthenticated(_))
        ));
    }
}
