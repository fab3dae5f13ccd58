//! Forward the downstream request through the QoS wrapper.

use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderValue, Request, Response, Uri};
use hyper::body::Incoming;
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::error::GatewayError;
use crate::http::X_REQUEST_ID;
use crate::pipeline::context::RequestContext;
use crate::pipeline::PipelineStage;
use crate::resilience::{ForwardCall, QosProvider};

/// Pooled HTTP client used for downstream calls.
pub type DownstreamClient = Client<HttpConnector, Body>;

pub fn downstream_client() -> DownstreamClient {
    Client::builder(TokioExecutor::new()).build(HttpConnector::new())
}

fn classify(error: hyper_util::client::legacy::Error) -> GatewayError {
    if error.is_connect() {
        GatewayError::ConnectionToDownstream(error.to_string())
    } else {
        GatewayError::UnableToCompleteRequest(error.to_string())
    }
}

/// Sends the request built by earlier stages and stores the response.
#[derive(Debug)]
pub struct RequesterStage {
    client: DownstreamClient,
    qos: Arc<dyn QosProvider>,
}

impl RequesterStage {
    pub fn new(client: DownstreamClient, qos: Arc<dyn QosProvider>) -> Self {
        Self { client, qos }
    }

    fn build_request(ctx: &mut RequestContext) -> Result<Request<Body>, GatewayError> {
        let downstream = &ctx.downstream;
        let url = downstream.url();
        let uri: Uri = url
            .parse()
            .map_err(|e| GatewayError::UnmappableRequest(format!("{}: {}", url, e)))?;

        let mut request = Request::builder()
            .method(downstream.method.clone())
            .uri(uri)
            .body(ctx.body.take().unwrap_or_else(Body::empty))
            .map_err(|e| GatewayError::UnmappableRequest(e.to_string()))?;

        *request.headers_mut() = ctx.downstream.headers.clone();
        let request_id = HeaderValue::from_str(&ctx.request_id)
            .map_err(|e| GatewayError::UnmappableRequest(format!("request id: {}", e)))?;
        request.headers_mut().insert(X_REQUEST_ID, request_id);
        Ok(request)
    }
}

#[async_trait]
impl PipelineStage for RequesterStage {
    fn name(&self) -> &'static str {
        "requester"
    }

    async fn run(&self, ctx: &mut RequestContext) -> Result<(), GatewayError> {
        let route = ctx.route()?.clone();
        let request = Self::build_request(ctx)?;

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.name,
            method = %request.method(),
            uri = %request.uri(),
            "Forwarding request"
        );

        let client = self.client.clone();
        let call: ForwardCall<'_> = Box::pin(async move {
            let response: Response<Incoming> = client.request(request).await.map_err(classify)?;
            Ok(response.map(Body::new))
        });
        let response = self.qos.wrap(&route, call).await?;

        tracing::debug!(
            request_id = %ctx.request_id,
            route = %route.name,
            status = response.status().as_u16(),
            "Downstream responded"
        );
        ctx.response = Some(response);
        Ok(())
    }
}
