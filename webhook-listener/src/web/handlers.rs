//! Webhook endpoint handlers.
//!
//! The webhook handler:
//! 1. Authenticates the body and turns it into an [`Event`]
//! 2. Dispatches the event to the registered handlers
//! 3. Maps the outcome onto a status code
//!
//! Authentication and parse failures never reach handler code.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{error, info, warn};

use crate::auth::{EventNormalizer, SIGNATURE_HEADER};
use crate::dispatch::{HandlerContext, HandlerRegistry};
use crate::error::{HandlerError, NormalizeError};
use crate::event::Event;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub normalizer: Arc<EventNormalizer>,
    pub registry: Arc<HandlerRegistry>,
    /// Parent of every per-request token; cancelled when draining times out
    pub requests: CancellationToken,
    /// Dispatches still running
    pub in_flight: TaskTracker,
}

impl AppState {
    pub fn new(normalizer: EventNormalizer, registry: Arc<HandlerRegistry>) -> Self {
        Self {
            normalizer: Arc::new(normalizer),
            registry,
            requests: CancellationToken::new(),
            in_flight: TaskTracker::new(),
        }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint. Never authenticated.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
#[derive(Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
}

impl WebhookResponse {
    fn reply(status: StatusCode, label: &'static str) -> Response {
        (
            status,
            Json(WebhookResponse {
                status: label,
                event_id: None,
            }),
        )
            .into_response()
    }
}

impl IntoResponse for NormalizeError {
    fn into_response(self) -> Response {
        match self {
            NormalizeError::Unauthorized => {
                WebhookResponse::reply(StatusCode::UNAUTHORIZED, "unauthorized")
            }
            NormalizeError::BadRequest(_) => {
                WebhookResponse::reply(StatusCode::BAD_REQUEST, "bad_request")
            }
        }
    }
}

impl IntoResponse for HandlerError {
    fn into_response(self) -> Response {
        WebhookResponse::reply(StatusCode::INTERNAL_SERVER_ERROR, "error")
    }
}

/// Webhook endpoint.
///
/// Accepts a raw signed token (optionally quoted) or a JSON event object.
/// Responds 200 once every matching handler succeeded, including when no
/// handler is registered for the event type.
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(e) => {
            warn!(error = %e, "webhook_body_read_failed");
            return NormalizeError::BadRequest(e.body_text()).into_response();
        }
    };

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    info!(
        body_length = body.len(),
        has_signature = signature.is_some(),
        "webhook_received"
    );

    let (event, method) = match state.normalizer.normalize(&body, signature).await {
        Ok(normalized) => normalized,
        Err(e) => {
            warn!(error = %e, "webhook_rejected");
            return e.into_response();
        }
    };

    let event = Arc::new(event);
    info!(
        event_id = ?event.id,
        event_type = %event.event_type,
        auth = method.as_str(),
        "webhook_authenticated"
    );

    // Cancelled if this future is dropped before dispatch finishes, or when
    // the listener gives up draining.
    let cancel = state.requests.child_token();
    let _guard = cancel.clone().drop_guard();
    let ctx = HandlerContext::new(cancel);

    let dispatched = state.in_flight.track_future(async {
        tokio::select! {
            biased;
            result = state.registry.dispatch(&ctx, event.clone()) => result,
            _ = ctx.cancelled() => Err(HandlerError::Cancelled),
        }
    });

    match dispatched.await {
        Ok(handled) => {
            info!(
                event_id = ?event.id,
                event_type = %event.event_type,
                handlers = handled,
                "webhook_dispatched"
            );
            accepted(&event)
        }
        Err(e) => {
            error!(
                event_id = ?event.id,
                event_type = %event.event_type,
                error = %e,
                "webhook_dispatch_failed"
            );
            e.into_response()
        }
    }
}

fn accepted(event: &Event) -> Response {
    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "accepted",
            event_id: event.id.clone(),
        }),
    )
        .into_response()
}
