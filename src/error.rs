//! Gateway error taxonomy.
//!
//! Every expected failure in the request pipeline is one of these variants.
//! Stages return them as values; the responder maps them to a status code via
//! [`GatewayError::status`]. Panics are not modelled here, they are caught by the
//! outer boundary in `pipeline` and surface as 500.

use axum::http::StatusCode;
use thiserror::Error;

/// Errors raised while routing and dispatching a request.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// No configured route matched the upstream request.
    #[error("Unable to find downstream route for path: {path}, verb: {method}")]
    UnableToFindDownstreamRoute { path: String, method: String },

    /// The caller could not be authenticated.
    #[error("Request for authenticated route {0} by unauthenticated caller")]
    Unauthenticated(String),

    /// The caller is authenticated but not allowed on this route.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A required claim was not present on the principal.
    #[error("Cannot find claim: {0}")]
    CannotFindClaim(String),

    /// A claim exists but its value does not satisfy the route requirement.
    #[error("Claim value not authorized: {0}")]
    ClaimValueNotAuthorized(String),

    /// None of the principal's scopes are allowed on this route.
    #[error("Scope not authorized: {0}")]
    ScopeNotAuthorized(String),

    /// The caller's address is rejected by the route's security options.
    #[error("{0} is blocked by the route's IP security policy")]
    IpBlocked(String),

    /// Service discovery returned an empty instance list.
    #[error("Services were empty for {0}")]
    ServicesAreEmpty(String),

    /// Service discovery has never produced an instance list.
    #[error("Services were null for {0}")]
    ServicesAreNull(String),

    /// No load balancer creator is registered under the requested type name.
    #[error("Unable to find load balancer: {0}")]
    UnableToFindLoadBalancer(String),

    /// A load balancer creator failed to build its balancer.
    #[error("Error invoking load balancer creator: {0}")]
    InvokingLoadBalancerCreator(String),

    /// No discovery provider is registered under the requested type name.
    #[error("Unable to find service discovery provider for type: {0}")]
    UnableToFindServiceDiscoveryProvider(String),

    /// The discovery registry could not be queried and no cached list exists.
    #[error("Service discovery unavailable for {service}: {reason}")]
    ServiceDiscoveryUnavailable { service: String, reason: String },

    /// The upstream request could not be mapped to a downstream request.
    #[error("Unable to map request: {0}")]
    UnmappableRequest(String),

    /// The downstream path still contains placeholders after substitution.
    #[error("Downstream path {0} contains unresolved placeholders")]
    DownstreamPathUnresolved(String),

    /// The downstream call exceeded its QoS timeout.
    #[error("Timeout making http request to downstream after {0} ms")]
    RequestTimedOut(u64),

    /// The route's circuit breaker is open.
    #[error("Circuit is open for route {0}")]
    CircuitBroken(String),

    /// The downstream host could not be reached.
    #[error("Error connecting to downstream service: {0}")]
    ConnectionToDownstream(String),

    /// The downstream call failed after a connection was made.
    #[error("Error making http request: {0}")]
    UnableToCompleteRequest(String),

    /// Anything else that is expected to be impossible but is not a panic.
    #[error("Internal gateway error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Stable error code used in logs and metrics.
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnableToFindDownstreamRoute { .. } => "UnableToFindDownstreamRouteError",
            Self::Unauthenticated(_) => "UnauthenticatedError",
            Self::Unauthorized(_) => "UnauthorizedError",
            Self::CannotFindClaim(_) => "CannotFindClaimError",
            Self::ClaimValueNotAuthorized(_) => "ClaimValueNotAuthorizedError",
            Self::ScopeNotAuthorized(_) => "ScopeNotAuthorizedError",
            Self::IpBlocked(_) => "IpBlockedError",
            Self::ServicesAreEmpty(_) => "ServicesAreEmptyError",
            Self::ServicesAreNull(_) => "ServicesAreNullError",
            Self::UnableToFindLoadBalancer(_) => "UnableToFindLoadBalancerError",
            Self::InvokingLoadBalancerCreator(_) => "InvokingLoadBalancerCreatorError",
            Self::UnableToFindServiceDiscoveryProvider(_) => "UnableToFindServiceDiscoveryProviderError",
            Self::ServiceDiscoveryUnavailable { .. } => "ServiceDiscoveryUnavailableError",
            Self::UnmappableRequest(_) => "UnmappableRequestError",
            Self::DownstreamPathUnresolved(_) => "DownstreamPathUnresolvedError",
            Self::RequestTimedOut(_) => "RequestTimedOutError",
            Self::CircuitBroken(_) => "CircuitBrokenError",
            Self::ConnectionToDownstream(_) => "ConnectionToDownstreamServiceError",
            Self::UnableToCompleteRequest(_) => "UnableToCompleteRequestError",
            Self::Internal(_) => "UnknownError",
        }
    }

    /// HTTP status the responder returns for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated(_) | Self::IpBlocked(_) => StatusCode::UNAUTHORIZED,

            Self::Unauthorized(_)
            | Self::CannotFindClaim(_)
            | Self::ClaimValueNotAuthorized(_)
            | Self::ScopeNotAuthorized(_) => StatusCode::FORBIDDEN,

            Self::UnableToFindDownstreamRoute { .. }
            | Self::ServicesAreEmpty(_)
            | Self::ServicesAreNull(_)
            | Self::UnableToFindLoadBalancer(_)
            | Self::UnableToFindServiceDiscoveryProvider(_)
            | Self::UnmappableRequest(_) => StatusCode::NOT_FOUND,

            Self::RequestTimedOut(_) | Self::CircuitBroken(_) | Self::ServiceDiscoveryUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }

            Self::ConnectionToDownstream(_) | Self::UnableToCompleteRequest(_) => StatusCode::BAD_GATEWAY,

            Self::InvokingLoadBalancerCreator(_)
            | Self::DownstreamPathUnresolved(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let not_found = GatewayError::UnableToFindDownstreamRoute {
            path: "/unknown".into(),
            method: "DELETE".into(),
        };
        assert_eq!(not_found.status(), StatusCode::NOT_FOUND);
        assert_eq!(not_found.code(), "UnableToFindDownstreamRouteError");

        assert_eq!(GatewayError::Unauthenticated("r".into()).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(GatewayError::CannotFindClaim("sub".into()).status(), StatusCode::FORBIDDEN);
        assert_eq!(GatewayError::ServicesAreEmpty("svc".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(GatewayError::ServicesAreNull("svc".into()).status(), StatusCode::NOT_FOUND);
        assert_eq!(
            GatewayError::InvokingLoadBalancerCreator("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(GatewayError::RequestTimedOut(100).status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            GatewayError::UnableToCompleteRequest("reset".into()).status(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_display_carries_context() {
        let err = GatewayError::UnableToFindDownstreamRoute {
            path: "/a".into(),
            method: "GET".into(),
        };
        assert_eq!(err.to_string(), "Unable to find downstream route for path: /a, verb: GET");
    }
}
