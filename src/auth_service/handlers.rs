// ============================================================================
// Auth Service - HTTP Handlers
// ============================================================================

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::context::GatewayState;
use crate::error::{AppError, AppResult};

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    #[serde(rename = "type")]
    pub token_type: String,
    pub expires_in: i64,
}

/// POST /login
pub async fn login(
    State(state): State<Arc<GatewayState>>,
    Json(request): Json<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    let username = request.username.trim();
    if username.is_empty() {
        return Err(AppError::validation("username must not be empty"));
    }
    if request.password.is_empty() {
        return Err(AppError::validation("password must not be empty"));
    }

    let (_principal, issued) = state
        .authenticator
        .authenticate(username, &request.password)
        .await?;

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            token: issued.token,
            token_type: "Bearer".to_string(),
            expires_in: issued.expires_in,
        }),
    ))
}
