//! Canvas webhook listener.
//!
//! Receives Canvas live-event notifications over HTTP, authenticates them,
//! and routes each one to the handlers registered for its event type.
//!
//! ## Architecture
//!
//! ```text
//! POST /webhook → EventNormalizer (TokenVerifier → KeyCache, SignatureVerifier)
//!              → Event → HandlerRegistry::dispatch → handlers
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use canvas_webhooks::{handler_fn, Listener, ListenerConfig};
//!
//! # async fn run() -> Result<(), canvas_webhooks::ListenerError> {
//! let config = ListenerConfig::from_env();
//! let listener = Listener::new(config)?;
//! listener
//!     .register(
//!         "submission_created",
//!         handler_fn("print", |_ctx, event| async move {
//!             println!("{:?}", event.body);
//!             Ok(())
//!         }),
//!     )
//!     .await;
//! listener.run_until(async { let _ = tokio::signal::ctrl_c().await; }).await?;
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod event;
pub mod web;

// Re-export commonly used types
pub use auth::{EventNormalizer, KeyCache, SignatureVerifier, TokenVerifier};
pub use config::{ListenerConfig, LogFormat, Middleware};
pub use dispatch::{handler_fn, EventHandler, HandlerContext, HandlerRegistry};
pub use error::{
    ConfigError, HandlerError, KeyCacheError, ListenerError, NormalizeError, VerificationError,
};
pub use event::{event_types, Event};
pub use web::{Listener, ListenerState, RunningListener, ShutdownHandle};
