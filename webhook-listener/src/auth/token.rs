//! Signed-token verification against the publisher's key set.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};
use tracing::debug;

use crate::auth::keys::KeyCache;
use crate::error::{KeyCacheError, VerificationError};
use crate::event::Event;

/// RSA-class algorithms a token may be signed with.
const RSA_ALGORITHMS: &[Algorithm] = &[
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Verifies signed tokens and maps their claims to an [`Event`].
#[derive(Debug, Clone)]
pub struct TokenVerifier {
    keys: KeyCache,
    leeway_secs: u64,
}

impl TokenVerifier {
    pub fn new(keys: KeyCache) -> Self {
        Self {
            keys,
            leeway_secs: 0,
        }
    }

    /// Allow `exp`/`nbf` to be off by this many seconds.
    pub fn with_leeway(mut self, leeway_secs: u64) -> Self {
        self.leeway_secs = leeway_secs;
        self
    }

    pub fn key_cache(&self) -> &KeyCache {
        &self.keys
    }

    /// Verify a token's signature and validity window, then map its claims.
    pub async fn verify(&self, raw_token: &str) -> Result<Event, VerificationError> {
        let header =
            decode_header(raw_token).map_err(|e| VerificationError::Malformed(e.to_string()))?;

        if !RSA_ALGORITHMS.contains(&header.alg) {
            return Err(VerificationError::UnsupportedAlgorithm(format!(
                "{:?}",
                header.alg
            )));
        }

        let kid = header
            .kid
            .filter(|k| !k.is_empty())
            .ok_or(VerificationError::MissingKid)?;

        let key = self.keys.lookup(&kid).await.map_err(|e| match e {
            KeyCacheError::NotFound(kid) => VerificationError::UnknownKid(kid),
            other => VerificationError::KeyUnavailable(other),
        })?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_secs;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        let data = decode::<Map<String, Value>>(raw_token, &key.decoding_key(), &validation)
            .map_err(|e| match e.kind() {
                ErrorKind::InvalidSignature => VerificationError::BadSignature,
                ErrorKind::ExpiredSignature => VerificationError::Expired,
                ErrorKind::ImmatureSignature => VerificationError::NotYetValid,
                _ => VerificationError::Malformed(e.to_string()),
            })?;

        debug!(kid = %kid, alg = ?header.alg, "token_verified");

        Ok(Event::from_claims(data.claims))
    }
}

/// Map a token's claims to an [`Event`] without checking its signature.
///
/// The result is untrusted. Only call this once the request has been
/// authenticated some other way, or when the operator runs without
/// authentication.
pub fn parse_unverified(raw_token: &str) -> Result<Event, VerificationError> {
    let mut segments = raw_token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        return Err(VerificationError::Malformed(
            "expected three dot-separated segments".to_string(),
        ));
    };

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| VerificationError::Malformed(format!("payload is not base64url: {e}")))?;

    let claims: Map<String, Value> = serde_json::from_slice(&bytes)
        .map_err(|e| VerificationError::Malformed(format!("payload is not a JSON object: {e}")))?;

    Ok(Event::from_claims(claims))
}

/// Whether `body` has the shape of a compact token: three base64url
/// segments separated by exactly two dots, and not a JSON object.
pub fn looks_like_token(body: &str) -> bool {
    if body.starts_with('{') {
        return false;
    }

    let segments: Vec<&str> = body.split('.').collect();
    if segments.len() != 3 || segments[0].is_empty() || segments[1].is_empty() {
        return false;
    }

    segments.iter().all(|segment| {
        segment
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'='))
    })
}
