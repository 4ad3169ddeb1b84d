//! Error types for the webhook listener.
//!
//! Authentication and parsing errors are resolved at the request boundary and
//! never reach handler code. Handler errors propagate out of dispatch and
//! become a 500.

use std::net::SocketAddr;

use thiserror::Error;

use crate::event::EventBodyError;

/// Invalid listener setup. Raised before the server starts, never per request.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid bind address `{value}`: {reason}")]
    InvalidBindAddress { value: String, reason: String },

    #[error("invalid key-set URL `{value}`: {reason}")]
    InvalidKeySetUrl { value: String, reason: String },

    #[error("`{0}` must be greater than zero")]
    ZeroDuration(&'static str),

    #[error("body limit must be greater than zero bytes")]
    ZeroBodyLimit,
}

/// Key-set fetch and lookup failures.
#[derive(Debug, Clone, Error)]
pub enum KeyCacheError {
    /// The key set could not be fetched or decoded, and no usable key was cached.
    #[error("key set fetch failed: {0}")]
    FetchFailed(String),

    /// The key set was fetched but held no usable keys; the old cache was kept.
    #[error("key set refresh failed: {0}")]
    RefreshFailed(String),

    #[error("no key with id `{0}`")]
    NotFound(String),
}

/// Why a signed token was rejected. Logged, never shown to the client.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("malformed token: {0}")]
    Malformed(String),

    #[error("unsupported token algorithm {0}")]
    UnsupportedAlgorithm(String),

    #[error("token header has no key id")]
    MissingKid,

    #[error("unknown key id `{0}`")]
    UnknownKid(String),

    #[error("verification key unavailable: {0}")]
    KeyUnavailable(KeyCacheError),

    #[error("token signature is invalid")]
    BadSignature,

    #[error("token has expired")]
    Expired,

    #[error("token is not yet valid")]
    NotYetValid,
}

/// Request-level failures while turning a body into an [`Event`](crate::Event).
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("request is not authenticated")]
    Unauthorized,

    #[error("unparseable body: {0}")]
    BadRequest(String),
}

impl From<EventBodyError> for NormalizeError {
    fn from(err: EventBodyError) -> Self {
        NormalizeError::BadRequest(err.to_string())
    }
}

/// Failure reported by (or on behalf of) a registered handler.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("handler failed: {0}")]
    Failed(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl HandlerError {
    pub fn msg(message: impl std::fmt::Display) -> Self {
        HandlerError::Failed(message.to_string())
    }
}

/// Server lifecycle failures.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("listener was already started")]
    AlreadyStarted,

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
