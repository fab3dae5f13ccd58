//! Final step: turn the context into the upstream response.

use axum::body::Body;
use axum::http::{header, HeaderValue, Response};

use crate::error::GatewayError;
use crate::http::X_REQUEST_ID;
use crate::pipeline::context::RequestContext;

const HOP_BY_HOP: [header::HeaderName; 4] = [
    header::CONNECTION,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::TRAILER,
];

/// Error slot → status, otherwise relay the downstream response unchanged.
pub fn respond(ctx: &mut RequestContext) -> Response<Body> {
    let mut response = match (ctx.error.as_ref(), ctx.response.take()) {
        (Some(error), _) => error_response(error),
        (None, Some(mut downstream)) => {
            for name in &HOP_BY_HOP {
                downstream.headers_mut().remove(name);
            }
            downstream
        }
        (None, None) => {
            tracing::error!(request_id = %ctx.request_id, "Pipeline finished without a response");
            error_response(&GatewayError::Internal("no downstream response".into()))
        }
    };

    // drain yields the name only once for repeated values
    let mut current = None;
    for (name, value) in ctx.response_headers.drain() {
        if name.is_some() {
            current = name;
        }
        if let Some(name) = &current {
            response.headers_mut().append(name.clone(), value);
        }
    }
    if let Ok(id) = HeaderValue::from_str(&ctx.request_id) {
        response.headers_mut().insert(X_REQUEST_ID, id);
    }
    response
}

fn error_response(error: &GatewayError) -> Response<Body> {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = error.status();
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::context::test_context;
    use axum::http::StatusCode;

    #[test]
    fn test_error_maps_to_status() {
        let mut ctx = test_context("/unknown", &[]);
        ctx.error = Some(GatewayError::UnableToFindDownstreamRoute {
            path: "/unknown".into(),
            method: "DELETE".into(),
        });
        let response = respond(&mut ctx);
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(response.headers()[X_REQUEST_ID], "test-request");
    }

    #[test]
    fn test_relays_downstream_with_cookies() {
        let mut ctx = test_context("/", &[]);
        let mut downstream = Response::new(Body::from("hello"));
        *downstream.status_mut() = StatusCode::CREATED;
        downstream.headers_mut().insert(header::CONNECTION, HeaderValue::from_static("close"));
        downstream.headers_mut().insert("x-backend", HeaderValue::from_static("b1"));
        ctx.response = Some(downstream);
        ctx.set_cookie("sid", "abc").unwrap();

        let response = respond(&mut ctx);
        assert_eq!(response.status(), StatusCode::CREATED);
        assert!(response.headers().get(header::CONNECTION).is_none());
        assert_eq!(response.headers()["x-backend"], "b1");
        assert_eq!(response.headers()[header::SET_COOKIE], "sid=abc; Path=/");
    }

    #[test]
    fn test_every_set_cookie_is_relayed() {
        let mut ctx = test_context("/", &[]);
        ctx.response = Some(Response::new(Body::empty()));
        ctx.set_cookie("sid", "abc").unwrap();
        ctx.set_cookie("theme", "dark").unwrap();

        let response = respond(&mut ctx);
        let cookies: Vec<_> = response
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .map(|v| v.to_str().unwrap().to_string())
            .collect();
        assert_eq!(cookies, vec!["sid=abc; Path=/", "theme=dark; Path=/"]);
    }

    #[test]
    fn test_missing_response_is_internal_error() {
        let mut ctx = test_context("/", &[]);
        assert_eq!(respond(&mut ctx).status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
