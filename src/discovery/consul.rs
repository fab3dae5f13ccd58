//! Consul health-endpoint provider.
//!
//! Queries `/v1/health/service/{name}?passing=true` and turns each entry into a
//! [`ServiceInstance`]. Entries whose address carries a scheme or whose port is
//! not positive are skipped with a warning.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::ServiceDiscoveryConfig;
use crate::discovery::{ServiceDiscoveryProvider, ServiceHostAndPort, ServiceInstance, ServiceList};
use crate::error::GatewayError;

const TOKEN_HEADER: &str = "X-Consul-Token";
const VERSION_PREFIX: &str = "version-";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HealthEntry {
    #[serde(default)]
    node: Option<NodeEntry>,
    service: ServiceEntry,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct NodeEntry {
    #[serde(default)]
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceEntry {
    #[serde(rename = "ID", default)]
    id: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    port: i64,
    #[serde(default)]
    tags: Option<Vec<String>>,
}

/// Provider backed by a Consul agent.
#[derive(Debug)]
pub struct ConsulProvider {
    service: String,
    url: Url,
    token: Option<String>,
    client: reqwest::Client,
}

impl ConsulProvider {
    pub fn new(config: &ServiceDiscoveryConfig, service: &str) -> Result<Self, GatewayError> {
        let unavailable = |reason: String| GatewayError::ServiceDiscoveryUnavailable {
            service: service.to_string(),
            reason,
        };

        let base = format!("{}://{}:{}", config.scheme, config.host, config.port);
        let mut url = Url::parse(&base).map_err(|e| unavailable(format!("invalid registry url {}: {}", base, e)))?;
        url.path_segments_mut()
            .map_err(|_| unavailable(format!("registry url {} cannot be a base", base)))?
            .extend(["v1", "health", "service", service]);
        url.query_pairs_mut().append_pair("passing", "true");

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| unavailable(e.to_string()))?;

        Ok(Self {
            service: service.to_string(),
            url,
            token: config.token.clone().filter(|t| !t.is_empty()),
            client,
        })
    }

    /// The health query this provider issues.
    pub fn url(&self) -> &Url {
        &self.url
    }

    async fn fetch(&self) -> Result<Vec<HealthEntry>, reqwest::Error> {
        let mut request = self.client.get(self.url.clone());
        if let Some(token) = &self.token {
            request = request.header(TOKEN_HEADER, token);
        }
        request.send().await?.error_for_status()?.json().await
    }
}

#[async_trait]
impl ServiceDiscoveryProvider for ConsulProvider {
    async fn get_instances(&self) -> Result<Option<ServiceList>, GatewayError> {
        let entries = self.fetch().await.map_err(|e| {
            tracing::warn!(service = %self.service, error = %e, "Consul query failed");
            GatewayError::ServiceDiscoveryUnavailable {
                service: self.service.clone(),
                reason: e.to_string(),
            }
        })?;
        Ok(Some(Arc::new(to_instances(entries))))
    }
}

fn to_instances(entries: Vec<HealthEntry>) -> Vec<ServiceInstance> {
    entries.into_iter().filter_map(to_instance).collect()
}

fn to_instance(entry: HealthEntry) -> Option<ServiceInstance> {
    let service = entry.service;
    if service.address.contains("http://") || service.address.contains("https://") {
        tracing::warn!(
            service = %service.service,
            address = %service.address,
            "Skipping Consul entry: address must not contain a scheme"
        );
        return None;
    }
    let port = match u16::try_from(service.port) {
        Ok(port) if port > 0 => port,
        _ => {
            tracing::warn!(
                service = %service.service,
                port = service.port,
                "Skipping Consul entry: port must be positive"
            );
            return None;
        }
    };

    let host = if service.address.is_empty() {
        entry.node.map(|n| n.address).unwrap_or_default()
    } else {
        service.address
    };
    let tags = service.tags.unwrap_or_default();
    let version = tags
        .iter()
        .find_map(|t| t.strip_prefix(VERSION_PREFIX))
        .unwrap_or_default()
        .to_string();

    Some(ServiceInstance {
        name: service.service,
        host_and_port: ServiceHostAndPort::new(host, port),
        id: service.id,
        version,
        tags,
    })
}
