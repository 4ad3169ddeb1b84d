//! HTTP middleware chain.

use std::any::Any;

use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::error;

use crate::config::Middleware;

/// Wrap `router` in the configured middleware. The first entry ends up
/// outermost.
pub fn apply(mut router: Router, chain: &[Middleware]) -> Router {
    for middleware in chain.iter().rev() {
        router = match *middleware {
            Middleware::AccessLog => router.layer(TraceLayer::new_for_http()),
            Middleware::CatchPanic => router.layer(CatchPanicLayer::custom(panic_response)),
            Middleware::Timeout(timeout) => router.layer(TimeoutLayer::new(timeout)),
            // The extractor's own 2 MB default would otherwise cap larger limits.
            Middleware::BodyLimit(limit) => router
                .layer(DefaultBodyLimit::disable())
                .layer(RequestBodyLimitLayer::new(limit)),
        };
    }
    router
}

fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else if let Some(s) = panic.downcast_ref::<&str>() {
        *s
    } else {
        "unknown panic"
    };

    error!(panic = %detail, "handler_panic_recovered");

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "status": "error" })),
    )
        .into_response()
}
