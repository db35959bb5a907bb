use anyhow::{Context, Result};

mod logging;
mod microservices;

pub use logging::{LogFormat, LoggingConfig};
pub use microservices::{CircuitBreakerConfig, ServiceRegistry, ServicesConfig};

// ============================================================================
// Configuration Constants
// ============================================================================

const DEFAULT_PORT: u16 = 8080;
const DEFAULT_JWT_ISSUER: &str = "edge-gateway";
const DEFAULT_ACCESS_TOKEN_TTL_SECS: i64 = 3600;

const DEFAULT_IDENTITY_SERVICE_URL: &str = "http://localhost:8001";
const DEFAULT_IDENTITY_LOOKUP_PATH: &str = "/users/username/{username}";
const DEFAULT_IDENTITY_TIMEOUT_SECS: u64 = 5;

/// Header volume above which the inspection stage emits a warning (8 KiB)
pub const DEFAULT_MAX_HEADER_BYTES: usize = 8 * 1024;

/// HS256 secrets shorter than this are rejected at startup
pub const MIN_JWT_SECRET_BYTES: usize = 32;

// ============================================================================
// Configuration Structures
// ============================================================================

/// Token signing configuration
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// HS256 signing secret
    pub jwt_secret: String,
    /// Value of the `iss` claim, checked on verification
    pub jwt_issuer: String,
    /// Lifetime of issued access tokens
    pub access_token_ttl_secs: i64,
}

/// Identity backend consulted during login
#[derive(Clone, Debug)]
pub struct IdentityConfig {
    /// Base URL (e.g., "http://user-service:8001")
    pub base_url: String,
    /// Per-user path, `{username}` is replaced with the percent-encoded name
    pub lookup_path: String,
    pub timeout_secs: u64,
}

/// Request pipeline settings
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    /// Total header bytes (names + values) before a warning is logged
    pub max_header_bytes: usize,
}

#[derive(Clone, Debug)]
pub struct Config {
    pub port: u16,
    pub logging: LoggingConfig,
    pub auth: AuthConfig,
    pub identity: IdentityConfig,
    pub services: ServicesConfig,
    pub pipeline: PipelineConfig,
}

impl Config {
    /// Load configuration from process environment variables
    pub fn from_env() -> Result<Self> {
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// Every error returned here is fatal: the gateway must not start with a
    /// missing signing key or a malformed service registry.
    pub fn from_source<F>(source: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = parse_or(&source, "PORT", DEFAULT_PORT)?;

        let jwt_secret = source("JWT_SECRET")
            .filter(|s| !s.trim().is_empty())
            .context("JWT_SECRET must be set")?;
        if jwt_secret.len() < MIN_JWT_SECRET_BYTES {
            anyhow::bail!(
                "JWT_SECRET must be at least {} bytes long (got {})",
                MIN_JWT_SECRET_BYTES,
                jwt_secret.len()
            );
        }

        let access_token_ttl_secs =
            parse_or(&source, "ACCESS_TOKEN_TTL_SECS", DEFAULT_ACCESS_TOKEN_TTL_SECS)?;
        if access_token_ttl_secs <= 0 {
            anyhow::bail!("ACCESS_TOKEN_TTL_SECS must be positive");
        }

        let auth = AuthConfig {
            jwt_secret,
            jwt_issuer: source("JWT_ISSUER").unwrap_or_else(|| DEFAULT_JWT_ISSUER.to_string()),
            access_token_ttl_secs,
        };

        let lookup_path = source("IDENTITY_LOOKUP_PATH")
            .unwrap_or_else(|| DEFAULT_IDENTITY_LOOKUP_PATH.to_string());
        if !lookup_path.contains("{username}") {
            anyhow::bail!("IDENTITY_LOOKUP_PATH must contain a {{username}} placeholder");
        }

        let identity = IdentityConfig {
            base_url: source("IDENTITY_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_IDENTITY_SERVICE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            lookup_path,
            timeout_secs: parse_or(&source, "IDENTITY_TIMEOUT_SECS", DEFAULT_IDENTITY_TIMEOUT_SECS)?,
        };

        let pipeline = PipelineConfig {
            max_header_bytes: parse_or(&source, "MAX_HEADER_BYTES", DEFAULT_MAX_HEADER_BYTES)?,
        };

        Ok(Self {
            port,
            logging: LoggingConfig::from_source(&source)?,
            auth,
            identity,
            services: ServicesConfig::from_source(&source)?,
            pipeline,
        })
    }
}

/// Parse an optional variable, falling back to `default` when unset.
/// A value that is present but unparsable is an error, not a silent default.
pub(crate) fn parse_or<F, T>(source: &F, key: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match source(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {} ({})", key, raw, e)),
        None => Ok(default),
    }
}
