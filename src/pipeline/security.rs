//! Per-route IP allow/block filter.

use std::net::IpAddr;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::routing::SecurityPolicy;

/// Check `ip` against a route's policy. Block wins over allow.
pub fn check_ip(policy: &SecurityPolicy, ip: Option<IpAddr>) -> Result<(), GatewayError> {
    if policy.is_empty() {
        return Ok(());
    }
    let Some(ip) = ip.map(canonical) else {
        return Err(GatewayError::IpBlocked("unknown caller address".into()));
    };

    if policy.blocked.iter().any(|b| canonical(*b) == ip) {
        return Err(GatewayError::IpBlocked(ip.to_string()));
    }
    if !policy.allowed.is_empty() && !policy.allowed.iter().any(|a| canonical(*a) == ip) {
        return Err(GatewayError::IpBlocked(ip.to_string()));
    }
    Ok(())
}

/// IPv4-mapped IPv6 addresses compare as IPv4.
fn canonical(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(ip, IpAddr::V4),
        v4 => v4,
    }
}

/// Rejects callers excluded by the route's security options.
#[derive(Debug, Default)]
pub struct SecurityStage;

#[async_trait]
impl PipelineStage for SecurityStage {
    fn name(&self) -> &'static str {
        "security"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?;
        check_ip(&route.security, ctx.remote_addr.map(|a| a.ip()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(raw: &str) -> IpAddr {
        raw.parse().unwrap()
    }

    #[test]
    fn test_empty_policy_admits_everyone() {
        assert!(check_ip(&SecurityPolicy::default(), None).is_ok());
    }

    #[test]
    fn test_blocked_and_allowed() {
        let policy = SecurityPolicy {
            allowed: vec![ip("10.0.0.1"), ip("10.0.0.2")],
            blocked: vec![ip("10.0.0.2")],
        };
        assert!(check_ip(&policy, Some(ip("10.0.0.1"))).is_ok());
        assert_eq!(
            check_ip(&policy, Some(ip("10.0.0.2"))),
            Err(GatewayError::IpBlocked("10.0.0.2".into()))
        );
        assert!(check_ip(&policy, Some(ip("10.0.0.3"))).is_err());
        assert!(check_ip(&policy, Some(ip("::ffff:10.0.0.1"))).is_ok());
    }
}
