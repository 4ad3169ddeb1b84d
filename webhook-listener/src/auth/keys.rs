//! Remote key-set cache for signed-token verification.
//!
//! Keys are fetched lazily: a lookup against an empty or expired cache
//! triggers a refresh first. A failed refresh keeps serving whatever was
//! cached before, so a publisher outage does not take webhook intake down
//! with it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use jsonwebtoken::DecodingKey;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::error::KeyCacheError;

/// Default time a fetched key set is considered fresh.
pub const DEFAULT_KEY_TTL: Duration = Duration::from_secs(3600);

/// Default timeout for a key-set fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// An RSA public key from the key set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedKey {
    pub kid: String,
    /// Advertised algorithm, if the key set named one
    pub alg: Option<String>,
    /// Big-endian modulus bytes
    pub modulus: Vec<u8>,
    /// Big-endian public exponent bytes
    pub exponent: Vec<u8>,
}

impl CachedKey {
    pub fn decoding_key(&self) -> DecodingKey {
        DecodingKey::from_rsa_raw_components(&self.modulus, &self.exponent)
    }
}

/// Key-set document (`{"keys": [...]}`).
///
/// Entries stay as raw JSON so a single malformed key cannot fail the
/// whole document.
#[derive(Debug, Deserialize)]
struct KeySetDocument {
    keys: Vec<Value>,
}

/// One entry of the key set.
#[derive(Debug, Deserialize)]
struct JsonWebKey {
    kty: String,
    #[serde(default)]
    kid: Option<String>,
    #[serde(default, rename = "use")]
    key_use: Option<String>,
    #[serde(default)]
    alg: Option<String>,
    #[serde(default)]
    n: Option<String>,
    #[serde(default)]
    e: Option<String>,
}

/// Keys from the last successful refresh. Replaced wholesale, never merged.
#[derive(Default)]
struct KeySnapshot {
    keys: HashMap<String, Arc<CachedKey>>,
    refreshed_at: Option<Instant>,
}

/// Lazily refreshed cache of the publisher's verification keys.
///
/// Cloning is cheap; clones share the same cache.
#[derive(Clone)]
pub struct KeyCache {
    inner: Arc<KeyCacheInner>,
}

struct KeyCacheInner {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    snapshot: RwLock<KeySnapshot>,
}

impl std::fmt::Debug for KeyCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyCache")
            .field("url", &self.inner.url)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}

impl KeyCache {
    /// Create a cache for the key set at `url` with the default TTL and timeout.
    pub fn new(url: impl Into<String>) -> Self {
        Self::with_ttl(url, DEFAULT_KEY_TTL)
    }

    /// Create a cache with a custom TTL.
    pub fn with_ttl(url: impl Into<String>, ttl: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self::with_client(url, ttl, client)
    }

    /// Create a cache that fetches through the given HTTP client.
    pub fn with_client(url: impl Into<String>, ttl: Duration, client: reqwest::Client) -> Self {
        Self {
            inner: Arc::new(KeyCacheInner {
                url: url.into(),
                ttl,
                client,
                snapshot: RwLock::new(KeySnapshot::default()),
            }),
        }
    }

    pub fn url(&self) -> &str {
        &self.inner.url
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Resolve a key by id, refreshing first if the cache is empty or stale.
    ///
    /// If the refresh fails, a previously cached key for `kid` is still
    /// returned. Only when nothing usable was cached does the lookup fail.
    pub async fn lookup(&self, kid: &str) -> Result<Arc<CachedKey>, KeyCacheError> {
        if self.needs_refresh().await {
            if let Err(e) = self.refresh().await {
                let snapshot = self.inner.snapshot.read().await;
                if let Some(key) = snapshot.keys.get(kid) {
                    warn!(kid = %kid, error = %e, "key_cache_serving_stale");
                    return Ok(key.clone());
                }
                return Err(match e {
                    KeyCacheError::FetchFailed(reason) | KeyCacheError::RefreshFailed(reason) => {
                        KeyCacheError::FetchFailed(reason)
                    }
                    other => other,
                });
            }
        }

        let snapshot = self.inner.snapshot.read().await;
        snapshot
            .keys
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyCacheError::NotFound(kid.to_string()))
    }

    /// Fetch the key set and replace the cache.
    ///
    /// The network fetch runs without holding the lock. Unsupported and
    /// malformed entries are skipped; if nothing usable remains the refresh
    /// fails and the existing cache is left untouched. Returns the number of
    /// keys now cached.
    pub async fn refresh(&self) -> Result<usize, KeyCacheError> {
        let url = &self.inner.url;
        debug!(url = %url, "key_cache_refresh_start");

        let document = match self.fetch().await {
            Ok(doc) => doc,
            Err(e) => {
                warn!(url = %url, error = %e, "key_cache_refresh_failed");
                return Err(e);
            }
        };

        let total = document.keys.len();
        let keys = parse_key_set(document);

        if keys.is_empty() {
            warn!(url = %url, entries = total, "key_cache_refresh_empty");
            return Err(KeyCacheError::RefreshFailed(format!(
                "key set at {url} has no usable RSA keys ({total} entries)"
            )));
        }

        let count = keys.len();
        {
            let mut snapshot = self.inner.snapshot.write().await;
            *snapshot = KeySnapshot {
                keys,
                refreshed_at: Some(Instant::now()),
            };
        }

        info!(
            url = %url,
            key_count = count,
            skipped = total - count,
            "key_cache_refreshed"
        );

        Ok(count)
    }

    /// Number of cached keys.
    pub async fn key_count(&self) -> usize {
        self.inner.snapshot.read().await.keys.len()
    }

    /// Ids of the cached keys, sorted.
    pub async fn kids(&self) -> Vec<String> {
        let snapshot = self.inner.snapshot.read().await;
        let mut kids: Vec<String> = snapshot.keys.keys().cloned().collect();
        kids.sort();
        kids
    }

    /// When the cache was last successfully refreshed.
    pub async fn last_refreshed(&self) -> Option<Instant> {
        self.inner.snapshot.read().await.refreshed_at
    }

    async fn needs_refresh(&self) -> bool {
        let snapshot = self.inner.snapshot.read().await;
        snapshot.keys.is_empty()
            || snapshot
                .refreshed_at
                .map_or(true, |at| at.elapsed() >= self.inner.ttl)
    }

    async fn fetch(&self) -> Result<KeySetDocument, KeyCacheError> {
        let response = self
            .inner
            .client
            .get(&self.inner.url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| KeyCacheError::FetchFailed(e.to_string()))?;

        response
            .json::<KeySetDocument>()
            .await
            .map_err(|e| KeyCacheError::FetchFailed(format!("invalid key set document: {e}")))
    }
}

/// Keep the usable RSA signing keys, keyed by id.
fn parse_key_set(document: KeySetDocument) -> HashMap<String, Arc<CachedKey>> {
    let mut keys = HashMap::new();

    for entry in document.keys {
        let jwk: JsonWebKey = match serde_json::from_value(entry) {
            Ok(jwk) => jwk,
            Err(e) => {
                debug!(error = %e, "key_cache_entry_malformed");
                continue;
            }
        };

        match parse_key(jwk) {
            Ok(key) => {
                keys.insert(key.kid.clone(), Arc::new(key));
            }
            Err(reason) => debug!(reason = %reason, "key_cache_entry_skipped"),
        }
    }

    keys
}

fn parse_key(jwk: JsonWebKey) -> Result<CachedKey, String> {
    if jwk.kty != "RSA" {
        return Err(format!("unsupported key type {}", jwk.kty));
    }

    if let Some(key_use) = jwk.key_use.as_deref() {
        if key_use != "sig" {
            return Err(format!("unsupported key use {key_use}"));
        }
    }

    let kid = jwk
        .kid
        .filter(|k| !k.is_empty())
        .ok_or_else(|| "missing kid".to_string())?;

    let modulus = decode_component(jwk.n.as_deref(), "n")?;
    let exponent = decode_component(jwk.e.as_deref(), "e")?;

    Ok(CachedKey {
        kid,
        alg: jwk.alg,
        modulus,
        exponent,
    })
}

fn decode_component(value: Option<&str>, name: &str) -> Result<Vec<u8>, String> {
    let value = value.ok_or_else(|| format!("missing `{name}`"))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| format!("`{name}` is not base64url: {e}"))?;
    if bytes.is_empty() {
        return Err(format!("`{name}` is empty"));
    }
    Ok(bytes)
}
