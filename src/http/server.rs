//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (request ID, overall timeout, tracing)
//! - Build the pipeline and the shared state it reads
//! - Apply configuration reloads while serving
//! - Stop accepting on shutdown and drain in-flight requests
//!
//! # Design Decisions
//! - Every path and method goes to the pipeline; routing is not Axum's job
//! - Reloads swap the route table and keep balancers and breakers only for
//!   routes that survive unchanged; a configuration that fails validation
//!   leaves everything as it was
//! - Listener address, public base URL, authentication schemes and the
//!   default downstream timeout are read once at startup

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, Response},
    routing::any,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::validation::validate_config;
use crate::config::{ConfigError, GatewayConfig};
use crate::discovery::DiscoveryProviderFactory;
use crate::http::request::{request_id, MakeRequestUuid};
use crate::load_balancer::{LoadBalancerFactory, LoadBalancerHouse};
use crate::pipeline::{
    downstream_client, Authenticator, OutputCache, Pipeline, PipelineShared, RequestContext, StaticTokenAuthenticator,
};
use crate::resilience::{DefaultQosProvider, QosProvider};
use crate::routing::{RouteTable, Router as RouteRouter};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

/// Shared pieces a configuration reload touches.
#[derive(Debug, Clone)]
struct Reloader {
    router: Arc<RouteRouter>,
    house: Arc<LoadBalancerHouse>,
    qos: Arc<dyn QosProvider>,
    cache: Arc<OutputCache>,
}

impl Reloader {
    fn apply(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        validate_config(config).map_err(ConfigError::Validation)?;
        let table = RouteTable::from_config(config).map_err(ConfigError::Validation)?;

        self.router.install(table);
        let installed = self.router.snapshot();
        self.house.reload(config.service_discovery.clone(), &installed);
        self.qos.reload(&installed);
        self.cache.reload(&installed);
        Ok(())
    }
}

/// HTTP server for the gateway.
pub struct HttpServer {
    router: Router,
    config: GatewayConfig,
    reloader: Reloader,
}

impl HttpServer {
    /// Create a server with the built-in balancers, discovery providers and
    /// bearer-token authentication.
    pub fn new(config: GatewayConfig) -> Result<Self, ConfigError> {
        let factory = LoadBalancerFactory::new(DiscoveryProviderFactory::new(config.service_discovery.clone()));
        let authenticator = Arc::new(StaticTokenAuthenticator::from_config(&config.authentication));
        Self::with_components(config, factory, authenticator)
    }

    /// Create a server with caller-supplied balancer and discovery
    /// registrations or a custom authenticator.
    pub fn with_components(
        config: GatewayConfig,
        factory: LoadBalancerFactory,
        authenticator: Arc<dyn Authenticator>,
    ) -> Result<Self, ConfigError> {
        validate_config(&config).map_err(ConfigError::Validation)?;
        let routes = Arc::new(RouteRouter::from_config(&config).map_err(ConfigError::Validation)?);
        let house = Arc::new(LoadBalancerHouse::new(factory));
        let qos: Arc<dyn QosProvider> = Arc::new(DefaultQosProvider::new(Duration::from_millis(
            config.timeouts.downstream_ms,
        )));

        let cache = Arc::new(OutputCache::new());

        let pipeline = Pipeline::standard(
            PipelineShared {
                router: routes.clone(),
                house: house.clone(),
                authenticator,
                qos: qos.clone(),
                cache: cache.clone(),
                base_url: config.listener.base_url.clone(),
            },
            downstream_client(),
        );
        tracing::debug!(stages = ?pipeline.stage_names(), "Pipeline built");

        let state = AppState {
            pipeline: Arc::new(pipeline),
        };
        let router = Self::build_router(&config, state);

        Ok(Self {
            router,
            config,
            reloader: Reloader {
                router: routes,
                house,
                qos,
                cache,
            },
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GatewayConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(
                ServiceBuilder::new()
                    .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                    .layer(TraceLayer::new_for_http())
                    .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
                    .layer(PropagateRequestIdLayer::x_request_id()),
            )
    }

    /// Apply a new configuration to the running server.
    pub fn reload(&self, config: &GatewayConfig) -> Result<(), ConfigError> {
        self.reloader.apply(config)
    }

    /// Current route table handle.
    pub fn routes(&self) -> &Arc<RouteRouter> {
        &self.reloader.router
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Configurations arriving on `config_updates` are applied as they come;
    /// the server stops accepting when `shutdown` fires and returns once
    /// in-flight requests finish.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.reloader.router.snapshot().len(),
            "Gateway listening"
        );

        let reloader = self.reloader.clone();
        let reload_task = tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match reloader.apply(&config) {
                    Ok(()) => tracing::info!(routes = config.routes.len(), "Configuration reloaded"),
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected configuration update, keeping current routes")
                    }
                }
            }
        });

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                if let Err(e) = shutdown.recv().await {
                    tracing::debug!(error = %e, "Shutdown channel closed");
                }
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        reload_task.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the startup config.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Every request enters the pipeline here.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response<Body> {
    let request_id = request_id(request.headers());
    let (parts, body) = request.into_parts();

    tracing::debug!(
        request_id = %request_id,
        method = %parts.method,
        path = %parts.uri.path(),
        remote = %addr,
        "Request received"
    );

    let ctx = RequestContext::new(request_id, Some(addr), parts, body);
    state.pipeline.handle(ctx).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostAndPortConfig, RouteConfig};

    fn config(upstream: &str) -> GatewayConfig {
        GatewayConfig {
            routes: vec![RouteConfig::new(
                upstream,
                "/service/{id}",
                vec![HostAndPortConfig::new("localhost", 5001)],
            )],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_reload_installs_new_routes() {
        let server = HttpServer::new(config("/api/{id}")).unwrap();
        assert_eq!(server.routes().snapshot().len(), 1);

        let mut next = config("/api/{id}");
        next.routes.push(RouteConfig::new(
            "/v2/{id}",
            "/service/{id}",
            vec![HostAndPortConfig::new("localhost", 5002)],
        ));
        server.reload(&next).unwrap();
        assert_eq!(server.routes().snapshot().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_reload_keeps_routes() {
        let server = HttpServer::new(config("/api/{id}")).unwrap();
        assert!(server.reload(&config("/api/{}")).is_err());
        assert_eq!(server.routes().snapshot().len(), 1);
    }

    #[test]
    fn test_invalid_startup_config_is_rejected() {
        assert!(matches!(
            HttpServer::new(config("/api/{}")),
            Err(ConfigError::Validation(_))
        ));
    }
}
