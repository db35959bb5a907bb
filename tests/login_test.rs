mod test_utils;

use edge_gateway::auth::{Principal, TokenService};
use edge_gateway::config::AuthConfig;
use reqwest::StatusCode;
use serde_json::{json, Value};
use test_utils::*;

fn verifier() -> TokenService {
    TokenService::new(&AuthConfig {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        jwt_issuer: "edge-gateway".to_string(),
        access_token_ttl_secs: 600,
    })
    .unwrap()
}

#[tokio::test]
async fn test_login_with_valid_credentials_returns_bearer_token() {
    let (app, _orders, identity) = spawn_default().await;

    let response = app.login("admin", "admin123").await;
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = response.json().await.unwrap();
    assert_eq!(body["type"], "Bearer");
    assert_eq!(body["expires_in"], 600);
    let token = body["token"].as_str().expect("token must be present");

    let principal = verifier().verify(token).unwrap();
    assert_eq!(principal, Principal::new("admin", ["ROLE_ADMIN", "ROLE_USER"]));
    assert_eq!(identity.lookups.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_login_is_also_mounted_under_api() {
    let (app, _orders, _identity) = spawn_default().await;

    let response = app
        .client
        .post(app.url("/api/auth/login"))
        .json(&json!({"username": "admin", "password": "admin123"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_wrong_password_returns_401_without_token() {
    let (app, _orders, _identity) = spawn_default().await;

    let response = app.login("admin", "wrong").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body: Value = response.json().await.unwrap();
    assert!(body.get("token").is_none());
    assert_eq!(body["error_code"], "AUTHENTICATION_FAILED");
}

#[tokio::test]
async fn test_every_login_failure_is_indistinguishable() {
    let (app, _orders, _identity) = spawn_default().await;

    let wrong_password: Value = app.login("admin", "wrong").await.json().await.unwrap();

    for (username, password) in [
        ("nobody", "admin123"),   // unknown user
        ("broken", "admin123"),   // identity backend answers 500
        ("badhash", "anything"),  // stored hash is not bcrypt
    ] {
        let response = app.login(username, password).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "user {}", username);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body, wrong_password, "user {}", username);
    }
}

#[tokio::test]
async fn test_identity_backend_down_returns_401() {
    let orders = spawn_backend().await;
    // Nothing listens on port 9 of the loopback interface
    let config = test_config(
        "127.0.0.1:9",
        &[("orders", orders.address.as_str())],
        breaker_config(10, std::time::Duration::from_secs(30)),
    );
    let app = spawn_gateway(config).await;

    let response = app.login("admin", "admin123").await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_empty_fields_are_rejected_as_bad_request() {
    let (app, _orders, identity) = spawn_default().await;

    for (username, password) in [("", "admin123"), ("admin", ""), ("   ", "x")] {
        let response = app.login(username, password).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
    }

    let response = app
        .client
        .post(app.url("/login"))
        .json(&json!({}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    // Validation happens before the identity backend is consulted
    assert_eq!(identity.lookups.load(std::sync::atomic::Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_login_token_grants_access_to_protected_routes() {
    let (app, orders, _identity) = spawn_default().await;
    let token = app.admin_token().await;

    let response = app
        .client
        .get(app.url("/api/v1/orders/list"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(orders.hits(), 1);
}
