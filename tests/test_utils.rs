#![allow(dead_code)]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use bytes::Bytes;
use edge_gateway::{
    config::{
        AuthConfig, CircuitBreakerConfig, Config, IdentityConfig, LoggingConfig, PipelineConfig,
        ServiceRegistry, ServicesConfig,
    },
    context::GatewayState,
    create_router,
};
use serde_json::json;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;

pub const TEST_JWT_SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const ADMIN_USERNAME: &str = "admin";
pub const ADMIN_PASSWORD: &str = "admin123";

// ============================================================================
// Stub identity backend
// ============================================================================

pub struct IdentityBackend {
    pub address: String,
    pub lookups: Arc<AtomicUsize>,
}

struct IdentityState {
    admin_hash: String,
    lookups: Arc<AtomicUsize>,
}

/// Serves `/users/username/{username}`:
/// `admin` exists (password `admin123`), `broken` answers 500,
/// `badhash` has an unusable hash, everyone else is 404.
pub async fn spawn_identity_backend() -> IdentityBackend {
    let lookups = Arc::new(AtomicUsize::new(0));
    let state = Arc::new(IdentityState {
        // Cost 4 keeps the test suite fast
        admin_hash: bcrypt::hash(ADMIN_PASSWORD, 4).unwrap(),
        lookups: lookups.clone(),
    });

    let app = Router::new()
        .route("/users/username/:username", get(identity_lookup))
        .with_state(state);

    IdentityBackend {
        address: serve(app).await,
        lookups,
    }
}

async fn identity_lookup(
    State(state): State<Arc<IdentityState>>,
    Path(username): Path<String>,
) -> Response {
    state.lookups.fetch_add(1, Ordering::SeqCst);
    match username.as_str() {
        "admin" => Json(json!({
            "username": "admin",
            "passwordHash": state.admin_hash,
            "roles": ["ROLE_ADMIN", { "name": "ROLE_USER" }],
        }))
        .into_response(),
        "badhash" => Json(json!({
            "username": "badhash",
            "password": "plaintext-not-bcrypt",
            "roles": [],
        }))
        .into_response(),
        "broken" => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
        _ => StatusCode::NOT_FOUND.into_response(),
    }
}

// ============================================================================
// Stub target backend
// ============================================================================

/// A backend service whose health can be flipped during a test
pub struct TestBackend {
    pub address: String,
    pub hits: Arc<AtomicUsize>,
    pub healthy: Arc<AtomicBool>,
    /// Headers of the most recent request
    pub last_headers: Arc<Mutex<HeaderMap>>,
}

impl TestBackend {
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    pub fn last_header(&self, name: &str) -> Option<String> {
        self.last_headers
            .lock()
            .unwrap()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    }
}

#[derive(Clone)]
struct BackendState {
    hits: Arc<AtomicUsize>,
    healthy: Arc<AtomicBool>,
    last_headers: Arc<Mutex<HeaderMap>>,
}

/// Echoes every request as JSON while healthy, answers 500 otherwise.
/// Special paths: `/slow` sleeps 2s, `/forbidden` is 403, `/missing` is 404.
pub async fn spawn_backend() -> TestBackend {
    let state = BackendState {
        hits: Arc::new(AtomicUsize::new(0)),
        healthy: Arc::new(AtomicBool::new(true)),
        last_headers: Arc::new(Mutex::new(HeaderMap::new())),
    };

    let app = Router::new()
        .fallback(backend_handler)
        .with_state(state.clone());

    TestBackend {
        address: serve(app).await,
        hits: state.hits,
        healthy: state.healthy,
        last_headers: state.last_headers,
    }
}

async fn backend_handler(
    State(state): State<BackendState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    state.hits.fetch_add(1, Ordering::SeqCst);
    *state.last_headers.lock().unwrap() = headers;

    if !state.healthy.load(Ordering::SeqCst) {
        return (StatusCode::INTERNAL_SERVER_ERROR, "backend down").into_response();
    }

    match uri.path() {
        "/slow" => {
            tokio::time::sleep(Duration::from_secs(2)).await;
            "finally".into_response()
        }
        "/forbidden" => (StatusCode::FORBIDDEN, Json(json!({"error": "forbidden"}))).into_response(),
        "/missing" => (StatusCode::NOT_FOUND, Json(json!({"error": "no such thing"}))).into_response(),
        _ => Json(json!({
            "method": method.as_str(),
            "path": uri.path(),
            "query": uri.query(),
            "body": String::from_utf8_lossy(&body),
        }))
        .into_response(),
    }
}

// ============================================================================
// Gateway
// ============================================================================

pub struct TestApp {
    pub address: String,
    pub client: reqwest::Client,
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.address, path)
    }

    pub async fn login(&self, username: &str, password: &str) -> reqwest::Response {
        self.client
            .post(self.url("/login"))
            .json(&json!({ "username": username, "password": password }))
            .send()
            .await
            .expect("Failed to send login request")
    }

    /// Log in as the seeded admin and return the bearer token
    pub async fn admin_token(&self) -> String {
        let response = self.login(ADMIN_USERNAME, ADMIN_PASSWORD).await;
        assert_eq!(response.status(), reqwest::StatusCode::OK);
        let body: serde_json::Value = response.json().await.unwrap();
        body["token"].as_str().unwrap().to_string()
    }
}

pub fn breaker_config(window: usize, open: Duration) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        window_size: window,
        minimum_calls: window,
        failure_rate_threshold: 50.0,
        open_duration: open,
    }
}

pub fn test_config(
    identity_address: &str,
    services: &[(&str, &str)],
    circuit_breaker: CircuitBreakerConfig,
) -> Config {
    Config {
        port: 0,
        logging: LoggingConfig::default(),
        auth: AuthConfig {
            jwt_secret: TEST_JWT_SECRET.to_string(),
            jwt_issuer: "edge-gateway".to_string(),
            access_token_ttl_secs: 600,
        },
        identity: IdentityConfig {
            base_url: format!("http://{}", identity_address),
            lookup_path: "/users/username/{username}".to_string(),
            timeout_secs: 2,
        },
        services: ServicesConfig {
            registry: ServiceRegistry::from_pairs(
                services
                    .iter()
                    .map(|(name, address)| (*name, format!("http://{}", address))),
            ),
            connect_timeout: Duration::from_millis(500),
            call_timeout: Duration::from_millis(500),
            circuit_breaker,
        },
        pipeline: PipelineConfig {
            max_header_bytes: 8192,
        },
    }
}

pub async fn spawn_gateway(config: Config) -> TestApp {
    let state = GatewayState::build(Arc::new(config)).expect("Failed to build gateway state");
    let app = create_router(state);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestApp {
        address,
        client: reqwest::Client::new(),
    }
}

/// Identity backend, one `orders` backend and a gateway in front of them
pub async fn spawn_default() -> (TestApp, TestBackend, IdentityBackend) {
    let identity = spawn_identity_backend().await;
    let orders = spawn_backend().await;
    let config = test_config(
        &identity.address,
        &[("orders", orders.address.as_str())],
        breaker_config(10, Duration::from_secs(30)),
    );
    (spawn_gateway(config).await, orders, identity)
}

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    address
}
