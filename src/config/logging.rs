// ============================================================================
// Logging Configuration
// ============================================================================

use anyhow::Result;

const DEFAULT_HASH_SALT: &str = "edge-gateway";

/// Output format for the fmt layer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pretty" | "text" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => anyhow::bail!("Invalid log format: {}. Must be 'pretty' or 'json'", s),
        }
    }
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// `EnvFilter` directive (e.g., "info,edge_gateway=debug")
    pub rust_log: String,
    pub format: LogFormat,
    /// Salt for hashing usernames before they are logged
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_source<F>(source: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            rust_log: source("RUST_LOG").unwrap_or_else(|| "info".to_string()),
            format: match source("LOG_FORMAT") {
                Some(raw) => raw.parse()?,
                None => LogFormat::Pretty,
            },
            hash_salt: source("LOG_HASH_SALT").unwrap_or_else(|| DEFAULT_HASH_SALT.to_string()),
        })
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            rust_log: "info".to_string(),
            format: LogFormat::Pretty,
            hash_salt: DEFAULT_HASH_SALT.to_string(),
        }
    }
}
