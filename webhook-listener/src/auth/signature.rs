//! Shared-secret webhook signature verification.
//!
//! The publisher signs the raw request body with HMAC-SHA256 and sends the
//! hex digest in the `X-Canvas-Signature` header.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex HMAC-SHA256 of the raw body.
pub const SIGNATURE_HEADER: &str = "X-Canvas-Signature";

/// Verifies body signatures against an optional pre-shared secret.
#[derive(Clone, Default)]
pub struct SignatureVerifier {
    secret: Option<Vec<u8>>,
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

impl SignatureVerifier {
    /// Create a verifier. A missing or blank secret disables verification.
    pub fn new(secret: Option<&str>) -> Self {
        Self {
            secret: secret
                .filter(|s| !s.trim().is_empty())
                .map(|s| s.as_bytes().to_vec()),
        }
    }

    /// Check if signature verification is enabled.
    pub fn is_enabled(&self) -> bool {
        self.secret.is_some()
    }

    /// Verify `signature_hex` against the HMAC-SHA256 of `body`.
    ///
    /// With no secret configured every body passes. With a secret, a missing
    /// or non-hex signature fails. The digest comparison is constant-time.
    pub fn verify(&self, body: &[u8], signature_hex: Option<&str>) -> bool {
        let Some(secret) = self.secret.as_deref() else {
            return true;
        };

        let Some(signature_hex) = signature_hex.map(str::trim).filter(|s| !s.is_empty()) else {
            warn!("webhook_signature_missing");
            return false;
        };

        let signature = match hex::decode(signature_hex) {
            Ok(bytes) => bytes,
            Err(_) => {
                warn!(
                    signature_length = signature_hex.len(),
                    "webhook_signature_not_hex"
                );
                return false;
            }
        };

        let mut mac = match HmacSha256::new_from_slice(secret) {
            Ok(m) => m,
            Err(_) => {
                warn!("webhook_signature_invalid_key");
                return false;
            }
        };
        mac.update(body);

        let valid = mac.verify_slice(&signature).is_ok();
        if !valid {
            warn!(
                body_length = body.len(),
                signature_length = signature.len(),
                "webhook_signature_mismatch"
            );
        }

        valid
    }
}
