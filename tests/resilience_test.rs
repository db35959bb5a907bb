mod test_utils;

use reqwest::StatusCode;
use serde_json::Value;
use serial_test::serial;
use std::time::{Duration, Instant};
use test_utils::*;

async fn call(app: &TestApp, token: &str, path: &str) -> reqwest::Response {
    app.client
        .get(app.url(path))
        .bearer_auth(token)
        .send()
        .await
        .unwrap()
}

async fn circuit_state(app: &TestApp, service: &str) -> Option<String> {
    let circuits: Value = app
        .client
        .get(app.url("/health/circuits"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    circuits
        .as_array()?
        .iter()
        .find(|c| c["service"] == service)
        .and_then(|c| c["state"].as_str())
        .map(str::to_string)
}

async fn spawn_with_breaker(
    breaker: edge_gateway::config::CircuitBreakerConfig,
) -> (TestApp, TestBackend, TestBackend, IdentityBackend) {
    let identity = spawn_identity_backend().await;
    let orders = spawn_backend().await;
    let products = spawn_backend().await;
    let config = test_config(
        &identity.address,
        &[
            ("orders", orders.address.as_str()),
            ("products", products.address.as_str()),
        ],
        breaker,
    );
    (spawn_gateway(config).await, orders, products, identity)
}

#[tokio::test]
#[serial]
async fn test_failing_backend_opens_circuit_and_stops_calls() {
    let (app, orders, _products, _identity) =
        spawn_with_breaker(breaker_config(10, Duration::from_secs(30))).await;
    let token = app.admin_token().await;
    orders.set_healthy(false);

    for i in 0..10 {
        let response = call(&app, &token, "/api/v1/orders/list").await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE, "call {}", i);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error_code"], "BACKEND_UNAVAILABLE");
        assert_eq!(body["service"], "orders");
    }
    assert_eq!(orders.hits(), 10);
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("OPEN"));

    // Short-circuited: fallback without touching the backend
    let started = Instant::now();
    let response = call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() < Duration::from_millis(250));
    assert_eq!(orders.hits(), 10);
}

#[tokio::test]
#[serial]
async fn test_circuit_closes_after_successful_trial_call() {
    let (app, orders, _products, _identity) =
        spawn_with_breaker(breaker_config(2, Duration::from_millis(300))).await;
    let token = app.admin_token().await;

    orders.set_healthy(false);
    for _ in 0..2 {
        call(&app, &token, "/api/v1/orders/list").await;
    }
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("OPEN"));

    orders.set_healthy(true);
    let response = call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(orders.hits(), 2);

    tokio::time::sleep(Duration::from_millis(400)).await;

    let response = call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(orders.hits(), 3);
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("CLOSED"));
}

#[tokio::test]
#[serial]
async fn test_failed_trial_call_reopens_circuit() {
    let (app, orders, _products, _identity) =
        spawn_with_breaker(breaker_config(2, Duration::from_millis(300))).await;
    let token = app.admin_token().await;

    orders.set_healthy(false);
    for _ in 0..2 {
        call(&app, &token, "/api/v1/orders/list").await;
    }
    tokio::time::sleep(Duration::from_millis(400)).await;

    let response = call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(orders.hits(), 3);
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("OPEN"));

    // Cool-down restarted by the failed trial
    call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(orders.hits(), 3);
}

#[tokio::test]
#[serial]
async fn test_slow_backend_times_out_to_fallback() {
    let (app, orders, _products, _identity) =
        spawn_with_breaker(breaker_config(10, Duration::from_secs(30))).await;
    let token = app.admin_token().await;

    let started = Instant::now();
    let response = call(&app, &token, "/api/v1/orders/slow").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert!(started.elapsed() < Duration::from_millis(1500));
    assert_eq!(orders.hits(), 1);
}

#[tokio::test]
#[serial]
async fn test_client_errors_do_not_open_circuit() {
    let (app, orders, _products, _identity) =
        spawn_with_breaker(breaker_config(2, Duration::from_secs(30))).await;
    let token = app.admin_token().await;

    for _ in 0..4 {
        let response = call(&app, &token, "/api/v1/orders/forbidden").await;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
    assert_eq!(orders.hits(), 4);
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("CLOSED"));
}

#[tokio::test]
#[serial]
async fn test_circuits_are_isolated_per_service() {
    let (app, orders, products, _identity) =
        spawn_with_breaker(breaker_config(2, Duration::from_secs(30))).await;
    let token = app.admin_token().await;

    orders.set_healthy(false);
    for _ in 0..2 {
        call(&app, &token, "/api/v1/orders/list").await;
    }

    let response = call(&app, &token, "/api/v1/products/list").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(products.hits(), 1);
    assert_eq!(circuit_state(&app, "orders").await.as_deref(), Some("OPEN"));
    assert_eq!(circuit_state(&app, "products").await.as_deref(), Some("CLOSED"));
}

#[tokio::test]
#[serial]
async fn test_unreachable_backend_yields_fallback() {
    let identity = spawn_identity_backend().await;
    let config = test_config(
        &identity.address,
        &[("orders", "127.0.0.1:9")],
        breaker_config(10, Duration::from_secs(30)),
    );
    let app = spawn_gateway(config).await;
    let token = app.admin_token().await;

    let response = call(&app, &token, "/api/v1/orders/list").await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["service"], "orders");
}
