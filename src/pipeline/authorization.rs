//! Scope and claim requirements for authenticated routes.

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::pipeline::authentication::Principal;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::PlaceholderNameAndValue;

const SCOPE_CLAIM: &str = "scope";

/// Check that the principal holds at least one allowed scope.
///
/// A single `scope` claim may carry several space-separated scopes.
pub fn authorize_scopes(principal: &Principal, allowed: &[String]) -> Result<(), GatewayError> {
    if allowed.is_empty() {
        return Ok(());
    }

    let scopes: Vec<&str> = principal.values(SCOPE_CLAIM).flat_map(str::split_whitespace).collect();
    if scopes.is_empty() {
        return Err(GatewayError::ScopeNotAuthorized("caller has no scope claim".into()));
    }
    if scopes.iter().any(|s| allowed.iter().any(|a| a == s)) {
        return Ok(());
    }
    Err(GatewayError::ScopeNotAuthorized(format!(
        "no matching scope for {}",
        scopes.join(" ")
    )))
}

/// Check every `claim type -> required value` pair.
///
/// A required value of the form `{name}` is dynamic: the claim must contain
/// the value captured for that placeholder by the route match.
pub fn authorize_claims(
    principal: &Principal,
    requirements: &[(String, String)],
    placeholders: &[PlaceholderNameAndValue],
) -> Result<(), GatewayError> {
    for (claim_type, required) in requirements {
        let values: Vec<&str> = principal.values(claim_type).collect();
        if values.is_empty() {
            return Err(GatewayError::CannotFindClaim(format!("user does not have claim {}", claim_type)));
        }

        let dynamic = required
            .strip_prefix('{')
            .and_then(|r| r.strip_suffix('}'))
            .filter(|name| !name.is_empty());

        let expected = match dynamic {
            Some(name) => {
                let mut found = placeholders.iter().filter(|p| p.name.eq_ignore_ascii_case(name));
                match (found.next(), found.next()) {
                    (Some(p), None) => p.value.as_str(),
                    (None, _) => {
                        return Err(GatewayError::ClaimValueNotAuthorized(format!(
                            "required placeholder {} was not captured by the route",
                            name
                        )))
                    }
                    (Some(_), Some(_)) => {
                        return Err(GatewayError::ClaimValueNotAuthorized(format!(
                            "required placeholder {} is ambiguous",
                            name
                        )))
                    }
                }
            }
            None => required.as_str(),
        };

        if !values.contains(&expected) {
            return Err(GatewayError::ClaimValueNotAuthorized(format!(
                "claim {} value {} is not the required {}",
                claim_type,
                values.join(", "),
                expected
            )));
        }
    }
    Ok(())
}

/// Applies allowed scopes and the claims requirement.
#[derive(Debug, Default)]
pub struct AuthorizationStage;

#[async_trait]
impl PipelineStage for AuthorizationStage {
    fn name(&self) -> &'static str {
        "authorization"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let scopes = route
            .authentication
            .as_ref()
            .map(|a| a.allowed_scopes.as_slice())
            .unwrap_or_default();
        if scopes.is_empty() && route.claims_requirement.is_empty() {
            return Ok(());
        }

        let Some(principal) = ctx.principal.as_ref() else {
            return Err(GatewayError::Unauthorized(format!(
                "route {} has requirements but the caller is anonymous",
                route.name
            )));
        };
        authorize_scopes(principal, scopes)?;
        authorize_claims(principal, &route.claims_requirement, ctx.placeholders())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::authentication::Claim;

    fn principal() -> Principal {
        Principal::new(
            "Bearer",
            vec![
                Claim::new("role", "admin"),
                Claim::new("role", "user"),
                Claim::new("user_id", "42"),
                Claim::new("scope", "read write"),
            ],
        )
    }

    fn req(claim: &str, value: &str) -> Vec<(String, String)> {
        vec![(claim.to_string(), value.to_string())]
    }

    #[test]
    fn test_static_claim_requirement() {
        assert!(authorize_claims(&principal(), &req("role", "user"), &[]).is_ok());
        assert!(matches!(
            authorize_claims(&principal(), &req("role", "root"), &[]),
            Err(GatewayError::ClaimValueNotAuthorized(_))
        ));
        assert!(matches!(
            authorize_claims(&principal(), &req("tenant", "a"), &[]),
            Err(GatewayError::CannotFindClaim(_))
        ));
    }

    #[test]
    fn test_dynamic_claim_requirement() {
        let own = [PlaceholderNameAndValue::new("userId", "42")];
        let other = [PlaceholderNameAndValue::new("userId", "7")];
        assert!(authorize_claims(&principal(), &req("user_id", "{userId}"), &own).is_ok());
        assert!(authorize_claims(&principal(), &req("user_id", "{userId}"), &other).is_err());
        assert!(authorize_claims(&principal(), &req("user_id", "{missing}"), &own).is_err());
    }

    #[test]
    fn test_scopes() {
        assert!(authorize_scopes(&principal(), &[]).is_ok());
        assert!(authorize_scopes(&principal(), &["write".into()]).is_ok());
        assert!(matches!(
            authorize_scopes(&principal(), &["admin".into()]),
            Err(GatewayError::ScopeNotAuthorized(_))
        ));
        let no_scope = Principal::new("Bearer", vec![]);
        assert!(authorize_scopes(&no_scope, &["read".into()]).is_err());
    }
}
