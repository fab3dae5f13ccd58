//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! RequestContext (one per request)
//!     → route_finder.rs      (route + placeholders, 404 when none)
//!     → security.rs          (IP allow/block)
//!     → authentication.rs    (principal + claims)
//!     → authorization.rs     (scopes, claims requirement)
//!     → claims.rs            (claims → headers / query / path)
//!     → downstream_url.rs    (path template substitution)
//!     → output_cache.rs      (serve a stored response, skipping to the end)
//!     → load_balancing.rs    (lease an instance)
//!     → downstream_url.rs    (header templates)
//!     → header_transform.rs  (request header find/replace)
//!     → requester.rs         (QoS-wrapped forward)
//!     → header_transform.rs  (response header find/replace)
//!     → output_cache.rs      (store a successful response)
//!     → lease released
//!     → responder.rs         (error → status, or relay)
//! ```
//!
//! # Design Decisions
//! - Stages run strictly in order and return expected failures as values
//! - The first error is stored in the context's error slot and every later
//!   stage is skipped
//! - Once a response exists only stages marked `after_response` still run
//! - Panics are caught once, around the whole stage chain, and become 500
//! - The lease is owned by the context, so it is released on every path

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::Response;
use futures_util::FutureExt;

use crate::error::GatewayError;
use crate::load_balancer::LoadBalancerHouse;
use crate::observability::metrics;
use crate::resilience::QosProvider;
use crate::routing::Router;

pub mod authentication;
pub mod authorization;
pub mod claims;
pub mod context;
pub mod downstream_url;
pub mod header_transform;
pub mod load_balancing;
pub mod output_cache;
pub mod requester;
pub mod responder;
pub mod route_finder;
pub mod security;

pub use authentication::{Authenticator, Claim, Principal, StaticTokenAuthenticator};
pub use context::{DownstreamRequest, RequestContext};
pub use output_cache::OutputCache;
pub use requester::{downstream_client, DownstreamClient};

/// One step of request processing.
#[async_trait]
pub trait PipelineStage: Send + Sync + fmt::Debug {
    /// Name used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Whether the stage still runs once a response is present.
    fn after_response(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError>;
}

/// State the standard stages share with the server and its reloads.
#[derive(Debug, Clone)]
pub struct PipelineShared {
    pub router: Arc<Router>,
    pub house: Arc<LoadBalancerHouse>,
    pub authenticator: Arc<dyn Authenticator>,
    pub qos: Arc<dyn QosProvider>,
    pub cache: Arc<OutputCache>,
    /// Public gateway URL for `{BaseUrl}`.
    pub base_url: Option<String>,
}

/// Ordered stage chain with a single error slot.
#[derive(Debug)]
pub struct Pipeline {
    stages: Vec<Box<dyn PipelineStage>>,
}

impl Pipeline {
    pub fn new(stages: Vec<Box<dyn PipelineStage>>) -> Self {
        Self { stages }
    }

    /// The gateway's stage order.
    pub fn standard(shared: PipelineShared, client: DownstreamClient) -> Self {
        let PipelineShared {
            router,
            house,
            authenticator,
            qos,
            cache,
            base_url,
        } = shared;

        Self::new(vec![
            Box::new(route_finder::RouteFinderStage::new(router)),
            Box::new(security::SecurityStage),
            Box::new(authentication::AuthenticationStage::new(authenticator)),
            Box::new(authorization::AuthorizationStage),
            Box::new(claims::ClaimsTransformStage),
            Box::new(downstream_url::DownstreamUrlStage),
            Box::new(output_cache::CacheLookupStage::new(cache.clone())),
            Box::new(load_balancing::LoadBalancingStage::new(house)),
            Box::new(downstream_url::DownstreamHeadersStage),
            Box::new(header_transform::UpstreamHeaderTransformStage::new(base_url.clone())),
            Box::new(requester::RequesterStage::new(client, qos)),
            Box::new(header_transform::DownstreamHeaderTransformStage::new(base_url)),
            Box::new(output_cache::CacheStoreStage::new(cache)),
        ])
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run stages until one fails. The failure lands in `ctx.error`.
    pub async fn execute(&self, ctx: &mut RequestContext) {
        for stage in &self.stages {
            if ctx.response.is_some() && !stage.after_response() {
                continue;
            }
            if let Err(error) = stage.run(ctx).await {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    stage = stage.name(),
                    route = ctx.route_name().unwrap_or("-"),
                    error_code = error.code(),
                    error = %error,
                    "Pipeline short-circuited"
                );
                metrics::record_stage_error(stage.name(), error.code());
                ctx.error = Some(error);
                return;
            }
        }
    }

    /// Run the whole request and produce the upstream response.
    pub async fn handle(&self, mut ctx: RequestContext) -> Response<Body> {
        let start = Instant::now();

        let outcome = AssertUnwindSafe(self.execute(&mut ctx)).catch_unwind().await;
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            tracing::error!(
                request_id = %ctx.request_id,
                route = ctx.route_name().unwrap_or("-"),
                panic = %message,
                "Unexpected fault in pipeline"
            );
            ctx.response = None;
            ctx.error = Some(GatewayError::Internal(message));
        }

        // release before relaying; the body streams without holding the instance
        drop(ctx.lease.take());

        let response = responder::respond(&mut ctx);
        metrics::record_request(
            ctx.upstream.method.as_str(),
            response.status().as_u16(),
            ctx.route_name().unwrap_or("none"),
            start,
        );
        response
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::test_context;
    use axum::http::StatusCode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl PipelineStage for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn run(&self, _ctx: &mut RequestContext) -> Result<(), GatewayError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Debug)]
    struct Failing;

    #[async_trait]
    impl PipelineStage for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn run(&self, _ctx: &mut RequestContext) -> Result<(), GatewayError> {
            Err(GatewayError::CannotFindClaim("sub".into()))
        }
    }

    #[derive(Debug)]
    struct Panicking;

    #[async_trait]
    impl PipelineStage for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        async fn run(&self, _ctx: &mut RequestContext) -> Result<(), GatewayError> {
            panic!("stage bug");
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Shared(Arc<Counting>);

    #[async_trait]
    impl PipelineStage for Shared {
        fn name(&self) -> &'static str {
            "shared"
        }

        async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
            self.0.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_error_short_circuits() {
        let after = Shared::default();
        let pipeline = Pipeline::new(vec![Box::new(Failing), Box::new(after.clone())]);

        let response = pipeline.handle(test_context("/", &[])).await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(after.0 .0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_panic_becomes_500() {
        let pipeline = Pipeline::new(vec![Box::new(Panicking)]);
        let response = pipeline.handle(test_context("/", &[])).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[derive(Debug)]
    struct Answering;

    #[async_trait]
    impl PipelineStage for Answering {
        fn name(&self) -> &'static str {
            "answering"
        }

        async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
            ctx.response = Some(Response::new(Body::from("early")));
            Ok(())
        }
    }

    #[derive(Debug, Clone, Default)]
    struct Finishing(Arc<Counting>);

    #[async_trait]
    impl PipelineStage for Finishing {
        fn name(&self) -> &'static str {
            "finishing"
        }

        fn after_response(&self) -> bool {
            true
        }

        async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
            self.0.run(ctx).await
        }
    }

    #[tokio::test]
    async fn test_response_skips_to_after_response_stages() {
        let skipped = Shared::default();
        let finishing = Finishing::default();
        let pipeline = Pipeline::new(vec![
            Box::new(Answering),
            Box::new(skipped.clone()),
            Box::new(finishing.clone()),
        ]);

        let response = pipeline.handle(test_context("/", &[])).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(skipped.0 .0.load(Ordering::SeqCst), 0);
        assert_eq!(finishing.0 .0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_stage_runs_in_order() {
        let counter = Shared::default();
        let pipeline = Pipeline::new(vec![Box::new(counter.clone()), Box::new(counter.clone())]);
        let mut ctx = test_context("/", &[]);
        pipeline.execute(&mut ctx).await;
        assert!(ctx.error.is_none());
        assert_eq!(counter.0 .0.load(Ordering::SeqCst), 2);
    }
}
