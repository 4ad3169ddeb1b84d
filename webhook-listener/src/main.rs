//! Canvas webhook listener binary.
//!
//! Receives Canvas live events, authenticates them, and logs every event
//! whose type is listed in `CANVAS_WEBHOOK_EVENTS`.

use anyhow::{Context, Result};
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use canvas_webhooks::{handler_fn, Listener, ListenerConfig, LogFormat};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging before loading config so its warnings are kept
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    match LogFormat::from_env() {
        LogFormat::Json => registry.with(fmt::layer().json().flatten_event(true)).init(),
        LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
    }

    let config = ListenerConfig::from_env();

    info!(
        bind_addr = %config.bind_addr,
        secret_configured = config.shared_secret.is_some(),
        jwks_url = ?config.jwks_url,
        jwks_ttl_secs = config.jwks_ttl.as_secs(),
        event_types = ?config.event_types,
        "config_loaded"
    );

    let event_types = config.event_types.clone();
    let listener = Listener::new(config).context("Invalid listener configuration")?;

    for event_type in event_types {
        listener
            .register(
                event_type,
                handler_fn("log", |_ctx, event| async move {
                    info!(
                        event_id = ?event.id,
                        event_type = %event.event_type,
                        event_time = ?event.event_time,
                        body = %serde_json::Value::Object(event.body.clone()),
                        "event_received"
                    );
                    Ok(())
                }),
            )
            .await;
    }

    listener
        .run_until(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
