//! Shared helpers for integration tests: RSA fixtures, token minting, and an
//! in-process key-set endpoint.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};
use tokio::net::TcpListener;

pub const PRIMARY_PEM: &str = include_str!("../fixtures/rsa_primary.pem");
pub const OTHER_PEM: &str = include_str!("../fixtures/rsa_other.pem");
pub const PRIMARY_N: &str = "3xDAa9ErZtTyEaRXJbrOUlfWA_2-RmgBnxKqC459vEfhntZm_gM-5Sm7c82UQqvCgKQiuGQVAKug_zGihn34WuOATv-lX3QTTWQoMC2H2ey3h6Z2QPWAJybX1dDh9S0Nz4tU-oT0SJo8mkgh0Zyx9cPO4FcFkQno6map7NmLwgbMnXSSsCDlWSwgEsHHTz4khWxNmt7QjhPMVfGc5SjezRxa5xC1WzqjgxyYVJf61laFEpibnE-P1uI0kxui2vuOXMldB1d4xnEuBF7MjDp5O_1hZUu0aj7NK7GYwA_OMY_ypFNTDrtxoi0nidFTSRbBlVRW833W19LhK677rPjBSQ";
pub const OTHER_N: &str = "xQMeNJ54dXbscX7p1DW6HxTB02MiPFiVdZ2tuedmRrxkx8_G4464e8MSSxRX-R5_Z-0PMva4tFokb0akWcq61tV1GyKGZtssZPrwMnOnrm7j_BcfGeBOGsiIG_g4pBPZcx6B9wtHIZS3Ri9il7k9s8jGQQ3pM6CKxYNDdE6jbChIuQmFkTvY1Bj1pC8hTcnW4MjCIWP_A_zmwEi_ChOTcWYa7qaM-DrPxx2cnaIv9FZ5yVCzxDKgEzRwSU2M8HM_71-TdsS4XNbHqtx3JCnowum_le09eXMLTDmxhCcgr3eMKvueBqvKEfa3FZBa-6akL4jj4NzBbt9GSTgHhCzJWQ";
pub const EXPONENT: &str = "AQAB";

/// JWK entry for an RSA signing key.
pub fn rsa_jwk(kid: &str, n: &str) -> Value {
    json!({"kty": "RSA", "kid": kid, "use": "sig", "alg": "RS256", "n": n, "e": EXPONENT})
}

/// Sign `claims` with an RSA private key.
pub fn mint(kid: &str, pem: &str, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = Some(kid.to_string());
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).unwrap();
    encode(&header, claims, &key).unwrap()
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Key-set endpoint whose document can be swapped (or broken) mid-test.
#[derive(Clone)]
pub struct KeySetServer {
    pub url: String,
    document: Arc<Mutex<Option<Value>>>,
    hits: Arc<AtomicUsize>,
}

impl KeySetServer {
    pub async fn start(keys: Value) -> Self {
        let document = Arc::new(Mutex::new(Some(json!({ "keys": keys }))));
        let hits = Arc::new(AtomicUsize::new(0));

        let app = Router::new()
            .route("/jwks", get(serve_keys))
            .with_state((document.clone(), hits.clone()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            url: format!("http://{addr}/jwks"),
            document,
            hits,
        }
    }

    pub fn set_keys(&self, keys: Value) {
        *self.document.lock().unwrap() = Some(json!({ "keys": keys }));
    }

    /// Make the endpoint answer 500 from now on.
    pub fn fail(&self) {
        *self.document.lock().unwrap() = None;
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }
}

type KeySetState = (Arc<Mutex<Option<Value>>>, Arc<AtomicUsize>);

async fn serve_keys(
    State((document, hits)): State<KeySetState>,
) -> Result<Json<Value>, StatusCode> {
    hits.fetch_add(1, Ordering::SeqCst);
    let document = document.lock().unwrap().clone();
    document.map(Json).ok_or(StatusCode::INTERNAL_SERVER_ERROR)
}
