//! Web server module for receiving webhooks.
//!
//! This module provides:
//! - `POST /webhook`: authenticate, normalize, and dispatch one event
//! - `GET /health`: liveness probe, always open
//! - The [`Listener`] that owns the server lifecycle

pub mod handlers;
pub mod middleware;
pub mod server;

pub use handlers::{health, webhook, AppState, HealthResponse, WebhookResponse};
pub use server::{router, Listener, ListenerState, RunningListener, ShutdownHandle};
