//! Configuration module for environment variable parsing.
//!
//! Everything the listener needs is read from the environment at startup.
//! Bad numeric values fall back to their defaults with a warning; structural
//! problems (bad address, bad URL) are caught by [`ListenerConfig::validate`].

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;
use url::Url;

use crate::auth::keys::{DEFAULT_FETCH_TIMEOUT, DEFAULT_KEY_TTL};
use crate::error::ConfigError;

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

/// One layer of the HTTP middleware chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Middleware {
    /// Request/response access logging
    AccessLog,
    /// Turn a handler panic into a 500 instead of dropping the connection
    CatchPanic,
    /// Abort requests that run longer than this
    Timeout(Duration),
    /// Reject bodies larger than this many bytes
    BodyLimit(usize),
}

impl Middleware {
    /// The default chain, outermost first.
    pub fn default_chain() -> Vec<Middleware> {
        vec![
            Middleware::AccessLog,
            Middleware::CatchPanic,
            Middleware::Timeout(DEFAULT_REQUEST_TIMEOUT),
            Middleware::BodyLimit(DEFAULT_MAX_BODY_BYTES),
        ]
    }
}

/// Log output format for the diagnostic sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl LogFormat {
    /// Parse a `LOG_FORMAT` value. Unknown values yield `None`.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        match raw.map(str::trim) {
            Some("pretty") => Some(LogFormat::Pretty),
            Some("json") | Some("") | None => Some(LogFormat::Json),
            Some(_) => None,
        }
    }

    /// Read `LOG_FORMAT` without logging. The binary calls this before the
    /// subscriber is installed; [`ListenerConfig::from_env`] warns about bad
    /// values afterwards.
    pub fn from_env() -> Self {
        Self::parse(env::var("LOG_FORMAT").ok().as_deref()).unwrap_or_default()
    }
}

/// Listener configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind, e.g. `0.0.0.0:8080`
    pub bind_addr: String,

    /// Pre-shared secret for HMAC body signatures
    pub shared_secret: Option<String>,

    /// URL of the publisher's key set for signed-token verification
    pub jwks_url: Option<String>,

    /// How long a fetched key set is considered fresh
    pub jwks_ttl: Duration,

    /// Timeout for a key-set fetch
    pub jwks_timeout: Duration,

    /// Maximum time to wait for in-flight requests on shutdown
    pub shutdown_timeout: Duration,

    /// Middleware chain, outermost first
    pub middleware: Vec<Middleware>,

    /// Log output format
    pub log_format: LogFormat,

    /// Event types the binary registers a logging handler for
    pub event_types: Vec<String>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            shared_secret: None,
            jwks_url: None,
            jwks_ttl: DEFAULT_KEY_TTL,
            jwks_timeout: DEFAULT_FETCH_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            middleware: Middleware::default_chain(),
            log_format: LogFormat::Json,
            event_types: Vec::new(),
        }
    }
}

impl ListenerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_source(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_source<F>(var: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port: u16 = parse_or("PORT", var("PORT"), DEFAULT_PORT);

        let bind_addr = non_blank(var("CANVAS_WEBHOOK_ADDR"))
            .unwrap_or_else(|| format!("0.0.0.0:{port}"));

        let request_timeout = Duration::from_secs(parse_or(
            "CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS",
            var("CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS"),
            DEFAULT_REQUEST_TIMEOUT.as_secs(),
        ));

        let max_body_bytes = parse_or(
            "CANVAS_WEBHOOK_MAX_BODY_BYTES",
            var("CANVAS_WEBHOOK_MAX_BODY_BYTES"),
            DEFAULT_MAX_BODY_BYTES,
        );

        let raw_log_format = var("LOG_FORMAT");
        let log_format = LogFormat::parse(raw_log_format.as_deref()).unwrap_or_else(|| {
            warn!(env_var = "LOG_FORMAT", value = ?raw_log_format, "Invalid log format, using default");
            LogFormat::Json
        });

        ListenerConfig {
            bind_addr,

            shared_secret: non_blank(var("CANVAS_WEBHOOK_SECRET")),

            jwks_url: non_blank(var("CANVAS_JWKS_URL")),

            jwks_ttl: Duration::from_secs(parse_or(
                "CANVAS_JWKS_TTL_SECS",
                var("CANVAS_JWKS_TTL_SECS"),
                DEFAULT_KEY_TTL.as_secs(),
            )),

            jwks_timeout: Duration::from_millis(parse_or(
                "CANVAS_JWKS_TIMEOUT_MS",
                var("CANVAS_JWKS_TIMEOUT_MS"),
                DEFAULT_FETCH_TIMEOUT.as_millis() as u64,
            )),

            shutdown_timeout: Duration::from_secs(parse_or(
                "CANVAS_WEBHOOK_SHUTDOWN_TIMEOUT_SECS",
                var("CANVAS_WEBHOOK_SHUTDOWN_TIMEOUT_SECS"),
                DEFAULT_SHUTDOWN_TIMEOUT.as_secs(),
            )),

            middleware: vec![
                Middleware::AccessLog,
                Middleware::CatchPanic,
                Middleware::Timeout(request_timeout),
                Middleware::BodyLimit(max_body_bytes),
            ],

            log_format,

            event_types: parse_csv(var("CANVAS_WEBHOOK_EVENTS")).unwrap_or_default(),
        }
    }

    pub fn with_bind_addr(mut self, addr: impl Into<String>) -> Self {
        self.bind_addr = addr.into();
        self
    }

    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = non_blank(Some(secret.into()));
        self
    }

    pub fn with_jwks_url(mut self, url: impl Into<String>) -> Self {
        self.jwks_url = non_blank(Some(url.into()));
        self
    }

    pub fn with_jwks_ttl(mut self, ttl: Duration) -> Self {
        self.jwks_ttl = ttl;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Replace the middleware chain (outermost first).
    pub fn with_middleware(mut self, middleware: Vec<Middleware>) -> Self {
        self.middleware = middleware;
        self
    }

    /// Parse the bind address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind_addr
            .trim()
            .parse()
            .map_err(|e: std::net::AddrParseError| ConfigError::InvalidBindAddress {
                value: self.bind_addr.clone(),
                reason: e.to_string(),
            })
    }

    /// Check the configuration for setup errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.socket_addr()?;

        if let Some(raw) = &self.jwks_url {
            let url = Url::parse(raw).map_err(|e| ConfigError::InvalidKeySetUrl {
                value: raw.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidKeySetUrl {
                    value: raw.clone(),
                    reason: format!("unsupported scheme `{}`", url.scheme()),
                });
            }
            if self.jwks_ttl.is_zero() {
                return Err(ConfigError::ZeroDuration("CANVAS_JWKS_TTL_SECS"));
            }
        }

        if self.shutdown_timeout.is_zero() {
            return Err(ConfigError::ZeroDuration("CANVAS_WEBHOOK_SHUTDOWN_TIMEOUT_SECS"));
        }

        for middleware in &self.middleware {
            match *middleware {
                Middleware::Timeout(timeout) if timeout.is_zero() => {
                    return Err(ConfigError::ZeroDuration("CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS"));
                }
                Middleware::BodyLimit(0) => return Err(ConfigError::ZeroBodyLimit),
                _ => {}
            }
        }

        Ok(())
    }
}

/// Parse an optional value, falling back to `default` (with a warning) when
/// it is present but unparseable.
fn parse_or<T: std::str::FromStr>(name: &str, raw: Option<String>, default: T) -> T {
    match raw.as_deref().map(str::trim) {
        None | Some("") => default,
        Some(value) => value.parse().unwrap_or_else(|_| {
            warn!(env_var = name, value = %value, "Invalid value, using default");
            default
        }),
    }
}

fn non_blank(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Parse a comma-separated list of strings.
fn parse_csv(raw: Option<String>) -> Option<Vec<String>> {
    raw.map(|raw| {
        raw.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn source(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = ListenerConfig::from_source(source(&[]));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert!(config.shared_secret.is_none());
        assert!(config.jwks_url.is_none());
        assert_eq!(config.jwks_ttl, Duration::from_secs(3600));
        assert_eq!(config.middleware, Middleware::default_chain());
        assert_eq!(config.log_format, LogFormat::Json);
        assert!(config.event_types.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_reads_variables() {
        let config = ListenerConfig::from_source(source(&[
            ("PORT", "9090"),
            ("CANVAS_WEBHOOK_SECRET", " s3cret "),
            ("CANVAS_JWKS_URL", "https://canvas.example.com/api/lti/security/jwks"),
            ("CANVAS_JWKS_TTL_SECS", "600"),
            ("CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS", "5"),
            ("CANVAS_WEBHOOK_MAX_BODY_BYTES", "2048"),
            ("CANVAS_WEBHOOK_EVENTS", "submission_created, grade_change,,"),
            ("LOG_FORMAT", "pretty"),
        ]));

        assert_eq!(config.bind_addr, "0.0.0.0:9090");
        assert_eq!(config.shared_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.jwks_ttl, Duration::from_secs(600));
        assert_eq!(
            config.middleware,
            vec![
                Middleware::AccessLog,
                Middleware::CatchPanic,
                Middleware::Timeout(Duration::from_secs(5)),
                Middleware::BodyLimit(2048),
            ]
        );
        assert_eq!(config.event_types, vec!["submission_created", "grade_change"]);
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_explicit_addr_wins_over_port() {
        let config = ListenerConfig::from_source(source(&[
            ("PORT", "9090"),
            ("CANVAS_WEBHOOK_ADDR", "127.0.0.1:7000"),
        ]));
        assert_eq!(config.bind_addr, "127.0.0.1:7000");
    }

    #[test]
    fn test_blank_secret_is_unset() {
        let config = ListenerConfig::from_source(source(&[
            ("CANVAS_WEBHOOK_SECRET", "   "),
            ("CANVAS_JWKS_URL", ""),
        ]));
        assert!(config.shared_secret.is_none());
        assert!(config.jwks_url.is_none());
    }

    #[test]
    fn test_invalid_numbers_fall_back() {
        let config = ListenerConfig::from_source(source(&[
            ("PORT", "eighty"),
            ("CANVAS_JWKS_TTL_SECS", "-1"),
        ]));
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.jwks_ttl, DEFAULT_KEY_TTL);
    }

    #[test]
    fn test_validate_rejects_bad_setup() {
        let config = ListenerConfig::default().with_bind_addr("not-an-address");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidBindAddress { .. })
        ));

        let config = ListenerConfig::default().with_jwks_url("/relative/keys");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidKeySetUrl { .. })
        ));

        let config = ListenerConfig::default().with_jwks_url("ftp://example.com/keys");
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidKeySetUrl { .. })
        ));

        let config = ListenerConfig::default()
            .with_jwks_url("https://example.com/keys")
            .with_jwks_ttl(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));

        let config = ListenerConfig::default().with_shutdown_timeout(Duration::ZERO);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroDuration(_))));
    }

    #[test]
    fn test_validate_rejects_zero_middleware_limits() {
        let config = ListenerConfig::default()
            .with_middleware(vec![Middleware::Timeout(Duration::ZERO)]);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ZeroDuration("CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS"))
        ));

        let config = ListenerConfig::default()
            .with_middleware(vec![Middleware::CatchPanic, Middleware::BodyLimit(0)]);
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBodyLimit)));

        let config = ListenerConfig::from_source(source(&[
            ("CANVAS_WEBHOOK_REQUEST_TIMEOUT_SECS", "0"),
        ]));
        assert!(config.validate().is_err());

        let config = ListenerConfig::from_source(source(&[("CANVAS_WEBHOOK_MAX_BODY_BYTES", "0")]));
        assert!(matches!(config.validate(), Err(ConfigError::ZeroBodyLimit)));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse(None), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(Some(" pretty ")), Some(LogFormat::Pretty));
        assert_eq!(LogFormat::parse(Some("json")), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse(Some("xml")), None);
    }

    #[test]
    fn test_invalid_values_warn_through_installed_subscriber() {
        let captured = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || {
            ListenerConfig::from_source(source(&[("PORT", "eighty"), ("LOG_FORMAT", "xml")]))
        });

        assert_eq!(config.log_format, LogFormat::Json);
        let logs = captured.contents();
        assert!(logs.contains("PORT"), "{logs}");
        assert!(logs.contains("LOG_FORMAT"), "{logs}");
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    #[test]
    fn test_parse_csv() {
        assert_eq!(
            parse_csv(Some("foo, bar, baz".to_string())),
            Some(vec!["foo".to_string(), "bar".to_string(), "baz".to_string()])
        );
        assert_eq!(parse_csv(None), None);
    }
}
