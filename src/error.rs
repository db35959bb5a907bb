use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Gateway error type
///
/// Every variant maps to a fixed client-facing shape. The `Display` text is
/// for logs only and may carry detail that `user_message()` deliberately
/// hides.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Authentication =====
    /// Bad credentials, unknown user or identity lookup failure.
    /// The cause is logged where it happens, never returned to the caller.
    #[error("Authentication failed")]
    AuthenticationFailed,

    #[error("Invalid token: {0}")]
    TokenInvalid(#[from] crate::auth::TokenError),

    #[error("Missing or malformed Authorization header")]
    MissingCredentials,

    // ===== Request =====
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ===== Backends =====
    #[error("Service '{0}' is unavailable")]
    BackendUnavailable(String),

    // ===== Internal =====
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthenticationFailed
            | AppError::TokenInvalid(_)
            | AppError::MissingCredentials => StatusCode::UNAUTHORIZED,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::BackendUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a user-friendly error message (without sensitive details)
    pub fn user_message(&self) -> String {
        match self {
            AppError::AuthenticationFailed => "Invalid username or password".to_string(),
            AppError::TokenInvalid(_) => "Invalid or expired token".to_string(),
            AppError::MissingCredentials => "Authentication required".to_string(),
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::NotFound(what) => format!("Not found: {}", what),
            AppError::BackendUnavailable(_) => "Service temporarily unavailable".to_string(),
            _ => "Internal server error".to_string(),
        }
    }

    /// Get error code for programmatic error handling
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::AuthenticationFailed => "AUTHENTICATION_FAILED",
            AppError::TokenInvalid(_) => "TOKEN_INVALID",
            AppError::MissingCredentials => "MISSING_CREDENTIALS",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::BackendUnavailable(_) => "BACKEND_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Log this error with appropriate level and context
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(
                error = %self,
                error_code = %code,
                status = %status.as_u16(),
                "Server error occurred"
            );
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Request rejected as unauthenticated"
            );
        } else {
            tracing::debug!(
                error = %self,
                error_code = %code,
                "Client error occurred"
            );
        }
    }

    /// JSON body returned to the client
    pub fn body(&self) -> serde_json::Value {
        let status = self.status_code();
        let mut body = json!({
            "error": self.user_message(),
            "error_code": self.error_code(),
            "status": status.as_u16(),
        });
        if let AppError::BackendUnavailable(service) = self {
            body["service"] = json!(service);
        }
        body
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();
        (self.status_code(), axum::Json(self.body())).into_response()
    }
}

// ============================================================================
// Helper functions for creating common errors
// ============================================================================

impl AppError {
    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    /// Create an internal server error
    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    /// Create a not-found error
    pub fn not_found(what: impl Into<String>) -> Self {
        AppError::NotFound(what.into())
    }
}
