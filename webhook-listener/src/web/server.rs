//! Listener lifecycle.
//!
//! ```text
//! Created ──start()──► Starting ──bind ok──► Running ──shutdown──► ShuttingDown ──drained──► Stopped
//! ```
//!
//! Shutdown waits for in-flight requests up to the configured deadline, then
//! abandons whatever is still running.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use tokio::{net::TcpListener, sync::watch, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

use crate::auth::{EventNormalizer, KeyCache, SignatureVerifier, TokenVerifier};
use crate::config::{ListenerConfig, Middleware};
use crate::dispatch::{EventHandler, HandlerRegistry};
use crate::error::ListenerError;
use crate::web::handlers::{health, webhook, AppState};
use crate::web::middleware;

/// Lifecycle state of a [`Listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Created,
    Starting,
    Running,
    ShuttingDown,
    Stopped,
}

/// Build the HTTP router: `GET /health` and `POST /webhook`, wrapped in the
/// given middleware chain.
pub fn router(state: AppState, chain: &[Middleware]) -> Router {
    let app = Router::new()
        .route("/health", get(health))
        .route("/webhook", post(webhook))
        .with_state(state);

    middleware::apply(app, chain)
}

/// Webhook listener: owns the key cache, the handler registry, and the server.
pub struct Listener {
    config: ListenerConfig,
    addr: SocketAddr,
    state: AppState,
    lifecycle: Arc<watch::Sender<ListenerState>>,
    shutdown: CancellationToken,
}

impl Listener {
    /// Validate the configuration and assemble the authentication chain.
    pub fn new(config: ListenerConfig) -> Result<Self, ListenerError> {
        config.validate()?;
        let addr = config.socket_addr()?;

        let tokens = match &config.jwks_url {
            Some(url) => {
                let client = reqwest::Client::builder()
                    .timeout(config.jwks_timeout)
                    .build()
                    .unwrap_or_default();
                Some(TokenVerifier::new(KeyCache::with_client(
                    url.clone(),
                    config.jwks_ttl,
                    client,
                )))
            }
            None => None,
        };
        let signatures = SignatureVerifier::new(config.shared_secret.as_deref());

        let normalizer = EventNormalizer::new(tokens, signatures);
        if !normalizer.is_authenticating() {
            warn!("webhook_auth_not_configured");
        }

        let state = AppState::new(normalizer, Arc::new(HandlerRegistry::new()));
        let (lifecycle, _) = watch::channel(ListenerState::Created);

        Ok(Self {
            config,
            addr,
            state,
            lifecycle: Arc::new(lifecycle),
            shutdown: CancellationToken::new(),
        })
    }

    /// Register a handler for an event type. Meant for setup, before `start`.
    pub async fn register(&self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        self.state.registry.register(event_type, handler).await;
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.state.registry
    }

    /// The key cache, when signed-token verification is configured.
    pub fn key_cache(&self) -> Option<&KeyCache> {
        self.state
            .normalizer
            .token_verifier()
            .map(TokenVerifier::key_cache)
    }

    pub fn state(&self) -> ListenerState {
        *self.lifecycle.borrow()
    }

    /// Handle that triggers graceful shutdown from anywhere.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            token: self.shutdown.clone(),
        }
    }

    /// The router this listener serves, with its middleware applied.
    pub fn router(&self) -> Router {
        router(self.state.clone(), &self.config.middleware)
    }

    /// Bind the listening socket and start serving in the background.
    pub async fn start(&self) -> Result<RunningListener, ListenerError> {
        let claimed = self.lifecycle.send_if_modified(|state| {
            if *state == ListenerState::Created {
                *state = ListenerState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(ListenerError::AlreadyStarted);
        }

        info!(address = %self.addr, "web_server_starting");

        let listener = match TcpListener::bind(self.addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.lifecycle.send_replace(ListenerState::Stopped);
                return Err(ListenerError::Bind {
                    addr: self.addr,
                    source,
                });
            }
        };
        let local_addr = listener.local_addr()?;

        self.lifecycle.send_replace(ListenerState::Running);
        info!(
            address = %local_addr,
            token_auth = self.key_cache().is_some(),
            secret_auth = self.config.shared_secret.is_some(),
            "web_server_listening"
        );

        let app = self.router();
        let token = self.shutdown.clone();
        let lifecycle = self.lifecycle.clone();
        let signal = async move {
            token.cancelled().await;
            lifecycle.send_replace(ListenerState::ShuttingDown);
            info!("web_server_shutting_down");
        };

        let server = tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(signal)
                .await
        });

        Ok(RunningListener {
            local_addr,
            server,
            shutdown: self.shutdown.clone(),
            requests: self.state.requests.clone(),
            in_flight: self.state.in_flight.clone(),
            lifecycle: self.lifecycle.clone(),
            drain_timeout: self.config.shutdown_timeout,
        })
    }

    /// Serve until `signal` resolves, then shut down gracefully.
    pub async fn run_until<F>(&self, signal: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()>,
    {
        let running = self.start().await?;
        tokio::select! {
            _ = signal => {}
            _ = self.shutdown.cancelled() => {}
        }
        running.shutdown().await
    }
}

/// Triggers graceful shutdown of a [`Listener`].
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    token: CancellationToken,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.token.cancel();
    }
}

/// A listener that is bound and serving.
pub struct RunningListener {
    local_addr: SocketAddr,
    server: JoinHandle<std::io::Result<()>>,
    shutdown: CancellationToken,
    requests: CancellationToken,
    in_flight: TaskTracker,
    lifecycle: Arc<watch::Sender<ListenerState>>,
    drain_timeout: Duration,
}

impl RunningListener {
    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn state(&self) -> ListenerState {
        *self.lifecycle.borrow()
    }

    /// Stop accepting connections and wait for in-flight requests to drain,
    /// up to the configured deadline. Past the deadline, running handlers are
    /// cancelled and awaited before the listener reports `Stopped`.
    pub async fn shutdown(self) -> Result<(), ListenerError> {
        self.shutdown.cancel();
        self.wait().await
    }

    /// Wait for the server to stop, after a shutdown was triggered elsewhere.
    pub async fn wait(mut self) -> Result<(), ListenerError> {
        tokio::select! {
            _ = self.shutdown.cancelled() => {}
            finished = &mut self.server => {
                self.lifecycle.send_replace(ListenerState::Stopped);
                warn!("web_server_stopped_unexpectedly");
                return match finished {
                    Ok(served) => served.map_err(ListenerError::from),
                    Err(join_error) => Err(ListenerError::Serve(std::io::Error::other(join_error))),
                };
            }
        }

        let result = match tokio::time::timeout(self.drain_timeout, &mut self.server).await {
            Ok(Ok(served)) => served.map_err(ListenerError::from),
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "web_server_task_failed");
                Ok(())
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.drain_timeout.as_secs_f64(),
                    in_flight = self.in_flight.len(),
                    "web_server_drain_timeout"
                );
                self.requests.cancel();
                self.in_flight.close();
                self.in_flight.wait().await;
                self.server.abort();
                Ok(())
            }
        };

        self.lifecycle.send_replace(ListenerState::Stopped);
        info!("web_server_shutdown_complete");
        result
    }
}
