// ============================================================================
// Resilient Proxy
// ============================================================================
//
// Outbound calls to backend services, each behind the circuit breaker for its
// target. The caller always gets either the backend's answer or the fallback
// it supplied; transport errors, timeouts, 5xx responses and open circuits
// never escape as errors.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, Method, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{CircuitBreakerConfig, ServicesConfig};
use crate::gateway::circuit_breaker::{CallOutcome, CircuitBreaker, CircuitSnapshot};

/// Why a backend call did not produce a usable result
#[derive(Debug, Clone, thiserror::Error)]
pub enum CallFailure {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("timed out after {0:?}")]
    Timeout(Duration),
    #[error("backend returned {0}")]
    ServerError(StatusCode),
    #[error("backend rejected request with {0}")]
    ClientError(StatusCode),
    #[error("undecodable response: {0}")]
    Decode(String),
}

impl CallFailure {
    /// Transport errors, timeouts and 5xx count against the breaker.
    /// A 4xx or a body we cannot decode means the backend is up.
    pub fn counts_against_breaker(&self) -> bool {
        matches!(
            self,
            CallFailure::Transport(_) | CallFailure::Timeout(_) | CallFailure::ServerError(_)
        )
    }

    fn outcome(&self) -> &'static str {
        match self {
            CallFailure::Timeout(_) => "timeout",
            _ => "failure",
        }
    }
}

/// One outbound request. Built per call, consumed by the proxy.
#[derive(Debug, Clone)]
pub struct ProxiedCall {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

impl ProxiedCall {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers.extend(headers);
        self
    }

    pub fn body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }
}

/// Headers that describe one hop and must not be copied across the proxy
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
            | "host"
            | "content-length"
    )
}

/// HTTP client for backend services with a circuit breaker per service
pub struct ResilientProxy {
    client: reqwest::Client,
    call_timeout: Duration,
    /// Circuit breakers per service, created on first use
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
    breaker_config: Arc<CircuitBreakerConfig>,
}

impl ResilientProxy {
    pub fn new(config: &ServicesConfig) -> Result<Self> {
        // Configure connection pooling and keep-alive
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.call_timeout)
            .tcp_keepalive(Duration::from_secs(30))
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()
            .context("Failed to create backend HTTP client")?;

        Ok(Self {
            client,
            call_timeout: config.call_timeout,
            breakers: RwLock::new(HashMap::new()),
            breaker_config: Arc::new(config.circuit_breaker.clone()),
        })
    }

    /// Get or create circuit breaker for a service
    pub async fn breaker(&self, service: &str) -> Arc<CircuitBreaker> {
        {
            let breakers = self.breakers.read().await;
            if let Some(breaker) = breakers.get(service) {
                return breaker.clone();
            }
        }

        let mut breakers = self.breakers.write().await;
        breakers
            .entry(service.to_string())
            .or_insert_with(|| {
                Arc::new(CircuitBreaker::new(service, self.breaker_config.clone()))
            })
            .clone()
    }

    /// Snapshots of every breaker created so far, sorted by service
    pub async fn circuit_states(&self) -> Vec<CircuitSnapshot> {
        let breakers = self.breakers.read().await;
        let mut states: Vec<_> = breakers.values().map(|b| b.snapshot()).collect();
        states.sort_by(|a, b| a.service.cmp(&b.service));
        states
    }

    /// Run `call` behind the breaker for `service`
    ///
    /// `call` is not invoked at all while the circuit is open. Its future is
    /// bounded by the per-call deadline; on timeout it is dropped and counted
    /// as a failure.
    pub async fn call_with_breaker<T, F, Fut, FB>(&self, service: &str, call: F, fallback: FB) -> T
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CallFailure>>,
        FB: FnOnce() -> T,
    {
        let started = Instant::now();
        let breaker = self.breaker(service).await;

        let permit = match breaker.try_acquire() {
            Ok(permit) => permit,
            Err(e) => {
                warn!(
                    service = service,
                    outcome = "short_circuited",
                    reason = %e,
                    latency_ms = started.elapsed().as_millis(),
                    "Circuit open, returning fallback"
                );
                return fallback();
            }
        };
        let probe = permit.is_probe();

        let result = match tokio::time::timeout(self.call_timeout, call()).await {
            Ok(result) => result,
            Err(_) => Err(CallFailure::Timeout(self.call_timeout)),
        };

        match result {
            Ok(value) => {
                permit.record(CallOutcome::Success);
                info!(
                    service = service,
                    outcome = "success",
                    probe = probe,
                    latency_ms = started.elapsed().as_millis(),
                    circuit_state = %breaker.state(),
                    "Backend call completed"
                );
                value
            }
            Err(failure) => {
                let outcome = if failure.counts_against_breaker() {
                    CallOutcome::Failure
                } else {
                    CallOutcome::Success
                };
                permit.record(outcome);
                warn!(
                    service = service,
                    outcome = failure.outcome(),
                    reason = %failure,
                    probe = probe,
                    latency_ms = started.elapsed().as_millis(),
                    circuit_state = %breaker.state(),
                    "Backend call failed, returning fallback"
                );
                fallback()
            }
        }
    }

    /// Forward a request and relay the backend's response as-is
    ///
    /// 2xx-4xx responses are returned to the caller unchanged. 5xx, transport
    /// errors, timeouts and open circuits yield `fallback()`.
    pub async fn forward<FB>(&self, service: &str, call: ProxiedCall, fallback: FB) -> Response
    where
        FB: FnOnce() -> Response,
    {
        self.call_with_breaker(
            service,
            || async move {
                let response = self.send(call).await?;
                let status = response.status();
                let headers = response.headers().clone();
                let body = response.bytes().await.map_err(|e| self.map_reqwest(e))?;

                let mut relayed = Response::new(Body::from(body));
                *relayed.status_mut() = status;
                for (name, value) in headers.iter() {
                    if !is_hop_by_hop(name) {
                        relayed.headers_mut().append(name.clone(), value.clone());
                    }
                }
                Ok::<_, CallFailure>(relayed)
            },
            fallback,
        )
        .await
    }

    /// Call a JSON endpoint and decode the body into `T`
    ///
    /// Any non-2xx answer, or a body that does not decode as `T`, yields
    /// `fallback`.
    pub async fn call_json<T>(&self, service: &str, call: ProxiedCall, fallback: T) -> T
    where
        T: DeserializeOwned,
    {
        self.call_with_breaker(
            service,
            || async move {
                let response = self.send(call).await?;
                let status = response.status();
                if !status.is_success() {
                    return Err(CallFailure::ClientError(status));
                }
                response
                    .json::<T>()
                    .await
                    .map_err(|e| CallFailure::Decode(e.to_string()))
            },
            || fallback,
        )
        .await
    }

    /// Execute the request; a 5xx status is a failure
    async fn send(&self, call: ProxiedCall) -> Result<reqwest::Response, CallFailure> {
        let mut request = self.client.request(call.method, &call.url);

        for (name, value) in call.headers.iter() {
            if !is_hop_by_hop(name) {
                request = request.header(name, value);
            }
        }
        if let Some(body) = call.body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| self.map_reqwest(e))?;
        let status = response.status();
        if status.is_server_error() {
            return Err(CallFailure::ServerError(status));
        }
        Ok(response)
    }

    fn map_reqwest(&self, err: reqwest::Error) -> CallFailure {
        if err.is_timeout() {
            CallFailure::Timeout(self.call_timeout)
        } else {
            CallFailure::Transport(err.to_string())
        }
    }
}
