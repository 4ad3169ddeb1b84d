//! Request authentication and body normalization.
//!
//! ## Fallback chain
//!
//! ```text
//! body ─► token verification (key set configured)  ── ok ──► Event
//!      └► HMAC signature check (secret configured) ── ok ──► tolerant parse ─► Event
//!      └► nothing configured                               ─► tolerant parse ─► Event
//!      └► otherwise                                        ─► Unauthorized
//! ```
//!
//! A token that fails verification falls through to the signature check when
//! a secret is configured; the token failure cause is only logged.

use tracing::{debug, info, warn};

use crate::auth::signature::SignatureVerifier;
use crate::auth::token::{looks_like_token, parse_unverified, TokenVerifier};
use crate::error::NormalizeError;
use crate::event::Event;

/// How a request was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Signed token verified against the key set
    Token,
    /// HMAC signature over the raw body
    SharedSecret,
    /// No authentication configured
    Open,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Token => "token",
            AuthMethod::SharedSecret => "shared_secret",
            AuthMethod::Open => "open",
        }
    }
}

/// Turns raw webhook requests into authenticated [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct EventNormalizer {
    tokens: Option<TokenVerifier>,
    signatures: SignatureVerifier,
}

impl EventNormalizer {
    pub fn new(tokens: Option<TokenVerifier>, signatures: SignatureVerifier) -> Self {
        Self { tokens, signatures }
    }

    /// Whether any authentication mechanism is configured.
    pub fn is_authenticating(&self) -> bool {
        self.tokens.is_some() || self.signatures.is_enabled()
    }

    pub fn token_verifier(&self) -> Option<&TokenVerifier> {
        self.tokens.as_ref()
    }

    /// Authenticate a request body and produce its event.
    pub async fn normalize(
        &self,
        body: &[u8],
        signature: Option<&str>,
    ) -> Result<(Event, AuthMethod), NormalizeError> {
        if let Some(tokens) = &self.tokens {
            match std::str::from_utf8(body) {
                Ok(text) => match tokens.verify(unquote(text.trim())).await {
                    Ok(event) => return Ok((event, AuthMethod::Token)),
                    Err(e) => debug!(cause = %e, "token_verification_failed"),
                },
                Err(_) => debug!("token_verification_skipped_non_utf8"),
            }
        }

        if self.signatures.is_enabled() {
            if self.signatures.verify(body, signature) {
                return Ok((tolerant_parse(body)?, AuthMethod::SharedSecret));
            }
        } else if self.tokens.is_none() {
            return Ok((tolerant_parse(body)?, AuthMethod::Open));
        }

        warn!(
            token_configured = self.tokens.is_some(),
            secret_configured = self.signatures.is_enabled(),
            has_signature = signature.is_some(),
            "webhook_unauthorized"
        );
        Err(NormalizeError::Unauthorized)
    }
}

/// Parse a body that has already passed (or skipped) authentication.
///
/// Surrounding quotes are stripped. Token-shaped bodies are decoded without
/// verification; everything else must be a JSON object.
pub fn tolerant_parse(body: &[u8]) -> Result<Event, NormalizeError> {
    let Ok(text) = std::str::from_utf8(body) else {
        return Ok(Event::from_json_slice(body)?);
    };

    let unquoted = unquote(text.trim());
    if looks_like_token(unquoted) {
        info!("webhook_body_parsed_as_unverified_token");
        return parse_unverified(unquoted).map_err(|e| NormalizeError::BadRequest(e.to_string()));
    }

    Ok(Event::from_json_slice(unquoted.as_bytes())?)
}

/// Strip one pair of surrounding double quotes.
fn unquote(text: &str) -> &str {
    text.strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .unwrap_or(text)
}
