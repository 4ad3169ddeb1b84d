//! Event handler registry and dispatch.
//!
//! Handlers are registered per event type and run in registration order.
//! Dispatch is fail-fast: the first handler error stops the chain for that
//! event. Events with no registered handlers are accepted and ignored.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HandlerError;
use crate::event::Event;

/// Per-request context shared by every handler invoked for one event.
#[derive(Debug, Clone, Default)]
pub struct HandlerContext {
    cancel: CancellationToken,
}

impl HandlerContext {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Token cancelled when the request is abandoned (client gone, timeout,
    /// forced shutdown).
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the request is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }
}

/// A caller-supplied event handler.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Returning an error stops the remaining handlers for
    /// this event and fails the request.
    async fn handle(&self, ctx: &HandlerContext, event: Arc<Event>) -> Result<(), HandlerError>;

    /// Name used in logs.
    fn name(&self) -> &str {
        "handler"
    }
}

/// Adapter that lets a closure act as an [`EventHandler`].
struct FnHandler<F> {
    name: String,
    f: F,
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(HandlerContext, Arc<Event>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: &HandlerContext, event: Arc<Event>) -> Result<(), HandlerError> {
        (self.f)(ctx.clone(), event).await
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Wrap a closure as a named handler.
pub fn handler_fn<F, Fut>(name: impl Into<String>, f: F) -> Arc<dyn EventHandler>
where
    F: Fn(HandlerContext, Arc<Event>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        f,
    })
}

/// Ordered handlers per event type.
///
/// Registration is expected during setup; dispatch runs concurrently from
/// every in-flight request.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Vec<Arc<dyn EventHandler>>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler for `event_type`. Duplicates are kept.
    pub async fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        let mut handlers = self.handlers.write().await;
        let list = handlers.entry(event_type.clone()).or_default();
        list.push(handler);

        info!(
            event_type = %event_type,
            handler_count = list.len(),
            "handler_registered"
        );
    }

    /// Number of handlers registered for `event_type`.
    pub async fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .await
            .get(event_type)
            .map_or(0, Vec::len)
    }

    /// Event types with at least one handler, sorted.
    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Run the handlers for `event.event_type` in registration order.
    ///
    /// Returns how many handlers ran. Stops at the first error, which is
    /// returned; later handlers are not invoked. A cancelled context stops
    /// the chain before the next handler starts.
    pub async fn dispatch(
        &self,
        ctx: &HandlerContext,
        event: Arc<Event>,
    ) -> Result<usize, HandlerError> {
        // Snapshot the list so no lock is held while handlers run.
        let handlers = match self.handlers.read().await.get(&event.event_type) {
            Some(list) => list.clone(),
            None => {
                debug!(event_type = %event.event_type, "dispatch_no_handlers");
                return Ok(0);
            }
        };

        for (index, handler) in handlers.iter().enumerate() {
            if ctx.is_cancelled() {
                warn!(
                    event_type = %event.event_type,
                    completed = index,
                    "dispatch_cancelled"
                );
                return Err(HandlerError::Cancelled);
            }

            if let Err(e) = handler.handle(ctx, event.clone()).await {
                warn!(
                    event_type = %event.event_type,
                    event_id = ?event.id,
                    handler = handler.name(),
                    position = index,
                    error = %e,
                    "handler_failed"
                );
                return Err(e);
            }
        }

        Ok(handlers.len())
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry").finish_non_exhaustive()
    }
}
