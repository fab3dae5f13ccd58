//! Claim transformations: claims into downstream headers, query string and path.
//!
//! Instructions look like `Claims[sub] > value[1] > |`: take the `sub` claim,
//! split it on `|` and use the token at index 1. Index and delimiter are
//! optional; `Claims[email]` forwards the whole value.

use async_trait::async_trait;
use axum::http::{HeaderName, HeaderValue};
use thiserror::Error;

use crate::error::GatewayError;
use crate::pipeline::authentication::Principal;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::PlaceholderNameAndValue;

/// Why a claim instruction was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InstructionError {
    #[error("instruction must start with Claims[<type>]")]
    NotForClaims,
    #[error("claim type must not be empty")]
    EmptyClaimType,
    #[error("invalid value index {0}")]
    InvalidIndex(String),
}

/// A compiled `Claims[...]` instruction targeting a header, query key or placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimToThing {
    /// Header name, query key or path placeholder name.
    pub key: String,
    pub claim_type: String,
    pub index: usize,
    pub delimiter: String,
}

impl ClaimToThing {
    pub fn parse(key: &str, instruction: &str) -> Result<Self, InstructionError> {
        let mut parts = instruction.split('>').map(str::trim);

        let claim_type = parts
            .next()
            .and_then(|p| p.strip_prefix("Claims["))
            .and_then(|p| p.strip_suffix(']'))
            .ok_or(InstructionError::NotForClaims)?
            .trim();
        if claim_type.is_empty() {
            return Err(InstructionError::EmptyClaimType);
        }

        let index = match parts.next() {
            None | Some("") | Some("value") => 0,
            Some(raw) => raw
                .strip_prefix("value[")
                .and_then(|p| p.strip_suffix(']'))
                .and_then(|p| p.trim().parse::<usize>().ok())
                .ok_or_else(|| InstructionError::InvalidIndex(raw.to_string()))?,
        };
        let delimiter = parts.next().unwrap_or_default().to_string();

        Ok(Self {
            key: key.to_string(),
            claim_type: claim_type.to_string(),
            index,
            delimiter,
        })
    }

    /// Resolve the instruction against a principal's claims.
    pub fn resolve(&self, principal: &Principal) -> Result<String, GatewayError> {
        let value = principal
            .values(&self.claim_type)
            .next()
            .ok_or_else(|| GatewayError::CannotFindClaim(format!("cannot find claim {}", self.claim_type)))?;

        if self.delimiter.is_empty() {
            return Ok(value.to_string());
        }

        value
            .split(self.delimiter.as_str())
            .nth(self.index)
            .map(str::to_string)
            .ok_or_else(|| {
                GatewayError::CannotFindClaim(format!(
                    "claim {} has no value at index {} when split on {}",
                    self.claim_type, self.index, self.delimiter
                ))
            })
    }
}

fn principal(ctx: &RequestContext) -> Result<&Principal, GatewayError> {
    ctx.principal
        .as_ref()
        .ok_or_else(|| GatewayError::CannotFindClaim("no authenticated principal to read claims from".into()))
}

/// Copies claims into downstream headers, query parameters and path placeholders.
#[derive(Debug, Default)]
pub struct ClaimsTransformStage;

#[async_trait]
impl PipelineStage for ClaimsTransformStage {
    fn name(&self) -> &'static str {
        "claims_transform"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        if route.claims_to_headers.is_empty() && route.claims_to_queries.is_empty() && route.claims_to_path.is_empty() {
            return Ok(());
        }

        for claim in &route.claims_to_headers {
            let value = claim.resolve(principal(ctx)?)?;
            let name = HeaderName::from_bytes(claim.key.as_bytes())
                .map_err(|e| GatewayError::UnmappableRequest(format!("header {}: {}", claim.key, e)))?;
            let value = HeaderValue::from_str(&value)
                .map_err(|e| GatewayError::UnmappableRequest(format!("header {} value: {}", claim.key, e)))?;
            ctx.downstream.headers.insert(name, value);
        }

        for claim in &route.claims_to_queries {
            let value = claim.resolve(principal(ctx)?)?;
            ctx.downstream.set_query_param(&claim.key, &value);
        }

        for claim in &route.claims_to_path {
            let value = claim.resolve(principal(ctx)?)?;
            if let Some(matched) = ctx.matched.as_mut() {
                matched.placeholders.retain(|p| !p.name.eq_ignore_ascii_case(&claim.key));
                matched.placeholders.push(PlaceholderNameAndValue::new(claim.key.as_str(), value));
            }
        }

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.name,
            "Claims applied to downstream request"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::authentication::Claim;

    fn user() -> Principal {
        Principal::new(
            "Bearer",
            vec![Claim::new("sub", "usr|42"), Claim::new("email", "a@b.c")],
        )
    }

    #[test]
    fn test_parse_full_instruction() {
        let claim = ClaimToThing::parse("x-user", "Claims[sub] > value[1] > |").unwrap();
        assert_eq!(claim.claim_type, "sub");
        assert_eq!(claim.index, 1);
        assert_eq!(claim.delimiter, "|");
    }

    #[test]
    fn test_parse_rejects_non_claim_instructions() {
        assert_eq!(ClaimToThing::parse("k", "sub"), Err(InstructionError::NotForClaims));
        assert_eq!(ClaimToThing::parse("k", "Claims[]"), Err(InstructionError::EmptyClaimType));
        assert!(matches!(
            ClaimToThing::parse("k", "Claims[sub] > val[x]"),
            Err(InstructionError::InvalidIndex(_))
        ));
    }

    #[test]
    fn test_instruction_error_messages() {
        assert_eq!(
            InstructionError::InvalidIndex("x".into()).to_string(),
            "invalid value index x"
        );
        let boxed: Box<dyn std::error::Error> = Box::new(InstructionError::EmptyClaimType);
        assert_eq!(boxed.to_string(), "claim type must not be empty");
    }

    #[test]
    fn test_resolve_with_delimiter_and_index() {
        let claim = ClaimToThing::parse("x-user", "Claims[sub] > value[1] > |").unwrap();
        assert_eq!(claim.resolve(&user()).unwrap(), "42");

        let whole = ClaimToThing::parse("x-email", "Claims[email]").unwrap();
        assert_eq!(whole.resolve(&user()).unwrap(), "a@b.c");

        let bare = ClaimToThing::parse("x-email", "Claims[email] > value").unwrap();
        assert_eq!(bare.index, 0);
        assert_eq!(bare.resolve(&user()).unwrap(), "a@b.c");
    }

    #[test]
    fn test_missing_claim_or_index() {
        let missing = ClaimToThing::parse("x", "Claims[role]").unwrap();
        assert!(matches!(missing.resolve(&user()), Err(GatewayError::CannotFindClaim(_))));

        let out_of_range = ClaimToThing::parse("x", "Claims[sub] > value[5] > |").unwrap();
        assert!(matches!(out_of_range.resolve(&user()), Err(GatewayError::CannotFindClaim(_))));
    }
}
