// ============================================================================
// Backend Services Configuration
// ============================================================================
//
// Static target registry (service name -> base URL), outbound deadlines and
// circuit breaker thresholds. Window size and failure rate are deployment
// inputs, validated here so a bad value stops the gateway at startup.
//
// ============================================================================

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::time::Duration;

use super::parse_or;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 2_000;
const DEFAULT_SERVICE_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_WINDOW_SIZE: usize = 10;
const DEFAULT_FAILURE_RATE_THRESHOLD: f64 = 50.0;
const DEFAULT_OPEN_SECS: u64 = 30;

/// Circuit breaker configuration for service resilience
#[derive(Clone, Debug)]
pub struct CircuitBreakerConfig {
    /// Number of most recent calls the failure rate is computed over
    pub window_size: usize,
    /// Calls that must be recorded before the failure rate is evaluated
    pub minimum_calls: usize,
    /// Failure rate in percent at or above which the circuit opens
    pub failure_rate_threshold: f64,
    /// Cool-down before an open circuit admits a trial call
    pub open_duration: Duration,
}

impl CircuitBreakerConfig {
    pub(crate) fn from_source<F>(source: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let window_size = parse_or(source, "CIRCUIT_BREAKER_WINDOW_SIZE", DEFAULT_WINDOW_SIZE)?;
        let config = Self {
            window_size,
            minimum_calls: parse_or(source, "CIRCUIT_BREAKER_MINIMUM_CALLS", window_size)?,
            failure_rate_threshold: parse_or(
                source,
                "CIRCUIT_BREAKER_FAILURE_RATE",
                DEFAULT_FAILURE_RATE_THRESHOLD,
            )?,
            open_duration: Duration::from_secs(parse_or(
                source,
                "CIRCUIT_BREAKER_OPEN_SECS",
                DEFAULT_OPEN_SECS,
            )?),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            anyhow::bail!("CIRCUIT_BREAKER_WINDOW_SIZE must be at least 1");
        }
        if self.minimum_calls == 0 || self.minimum_calls > self.window_size {
            anyhow::bail!(
                "CIRCUIT_BREAKER_MINIMUM_CALLS must be between 1 and the window size ({})",
                self.window_size
            );
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 100.0) {
            anyhow::bail!("CIRCUIT_BREAKER_FAILURE_RATE must be in (0, 100]");
        }
        Ok(())
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            window_size: DEFAULT_WINDOW_SIZE,
            minimum_calls: DEFAULT_WINDOW_SIZE,
            failure_rate_threshold: DEFAULT_FAILURE_RATE_THRESHOLD,
            open_duration: Duration::from_secs(DEFAULT_OPEN_SECS),
        }
    }
}

/// Service name -> base URL, without trailing slash
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ServiceRegistry {
    services: BTreeMap<String, String>,
}

impl ServiceRegistry {
    /// Parse a `name=url,name=url` list
    pub fn parse(raw: &str) -> Result<Self> {
        let mut services = BTreeMap::new();

        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, url) = entry
                .split_once('=')
                .with_context(|| format!("Registry entry '{}' is not name=url", entry))?;
            let name = name.trim().to_lowercase();
            let url = url.trim().trim_end_matches('/');

            if name.is_empty()
                || !name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                anyhow::bail!("Invalid service name in registry: '{}'", name);
            }

            let parsed = reqwest::Url::parse(url)
                .with_context(|| format!("Invalid URL for service '{}': {}", name, url))?;
            if parsed.scheme() != "http" && parsed.scheme() != "https" {
                anyhow::bail!("Service '{}' must use http or https, got {}", name, parsed.scheme());
            }

            if services.insert(name.clone(), url.to_string()).is_some() {
                anyhow::bail!("Service '{}' is registered twice", name);
            }
        }

        if services.is_empty() {
            anyhow::bail!("SERVICE_REGISTRY must name at least one service");
        }

        Ok(Self { services })
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            services: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.into().trim_end_matches('/').to_string()))
                .collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.services.get(name).map(String::as_str)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

/// Backend targets reachable through the resilient proxy
#[derive(Clone, Debug)]
pub struct ServicesConfig {
    pub registry: ServiceRegistry,
    pub connect_timeout: Duration,
    /// Total deadline per proxied call, including reading the body
    pub call_timeout: Duration,
    pub circuit_breaker: CircuitBreakerConfig,
}

impl ServicesConfig {
    pub(crate) fn from_source<F>(source: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw = source("SERVICE_REGISTRY").context("SERVICE_REGISTRY must be set")?;

        Ok(Self {
            registry: ServiceRegistry::parse(&raw)?,
            connect_timeout: Duration::from_millis(parse_or(
                source,
                "SERVICE_CONNECT_TIMEOUT_MS",
                DEFAULT_CONNECT_TIMEOUT_MS,
            )?),
            call_timeout: Duration::from_millis(parse_or(
                source,
                "SERVICE_TIMEOUT_MS",
                DEFAULT_SERVICE_TIMEOUT_MS,
            )?),
            circuit_breaker: CircuitBreakerConfig::from_source(source)?,
        })
    }
}
