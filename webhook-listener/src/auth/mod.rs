//! Webhook authentication.
//!
//! Two trust schemes co-exist:
//! - Signed tokens verified against the publisher's published key set
//! - HMAC-SHA256 signatures over the raw body with a pre-shared secret
//!
//! [`EventNormalizer`] chains them and produces the canonical event.

pub mod keys;
pub mod normalize;
pub mod signature;
pub mod token;

pub use keys::{CachedKey, KeyCache, DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_TTL};
pub use normalize::{tolerant_parse, AuthMethod, EventNormalizer};
pub use signature::{SignatureVerifier, SIGNATURE_HEADER};
pub use token::{looks_like_token, parse_unverified, TokenVerifier};
