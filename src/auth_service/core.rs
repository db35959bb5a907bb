use std::sync::{Arc, OnceLock};

use crate::auth::{IssuedToken, Principal, TokenService};
use crate::error::{AppError, AppResult};
use crate::identity::{IdentityLookup, LookupError};
use crate::utils::log_safe_id;

/// Hashed once, on the first failure that needs it
static DUMMY_HASH: OnceLock<Option<String>> = OnceLock::new();
const DUMMY_PASSWORD: &str = "edge-gateway-timing-equalizer";

/// A bcrypt hash at the default cost, for paths with no stored hash to check
pub(crate) fn dummy_hash() -> Option<&'static str> {
    DUMMY_HASH
        .get_or_init(|| bcrypt::hash(DUMMY_PASSWORD, bcrypt::DEFAULT_COST).ok())
        .as_deref()
}

/// Spend one bcrypt verification so that an unknown user, a failed lookup
/// and a wrong password all take about as long
async fn equalize_timing(password: &str) {
    let candidate = password.to_string();
    let result = tokio::task::spawn_blocking(move || {
        if let Some(hash) = dummy_hash() {
            let _ = bcrypt::verify(candidate, hash);
        }
    })
    .await;
    if let Err(e) = result {
        tracing::error!(error = %e, "Timing equalization task failed");
    }
}

/// Turns username/password into a signed token
///
/// Every failure surfaces as the same `AppError::AuthenticationFailed`. The
/// specific cause is only logged, with a hashed username.
pub struct Authenticator {
    identity: Arc<dyn IdentityLookup>,
    tokens: Arc<TokenService>,
    hash_salt: String,
}

impl Authenticator {
    pub fn new(
        identity: Arc<dyn IdentityLookup>,
        tokens: Arc<TokenService>,
        hash_salt: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            tokens,
            hash_salt: hash_salt.into(),
        }
    }

    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> AppResult<(Principal, IssuedToken)> {
        let username_hash = log_safe_id(username, &self.hash_salt);

        let record = match self.identity.lookup(username).await {
            Ok(record) => record,
            Err(LookupError::NotFound) => {
                tracing::warn!(
                    username_hash = %username_hash,
                    reason = "user_not_found",
                    "Login failed"
                );
                equalize_timing(password).await;
                return Err(AppError::AuthenticationFailed);
            }
            Err(LookupError::Failed(detail)) => {
                tracing::error!(
                    username_hash = %username_hash,
                    reason = "lookup_failed",
                    detail = %detail,
                    "Login failed: identity service unavailable"
                );
                equalize_timing(password).await;
                return Err(AppError::AuthenticationFailed);
            }
        };

        // bcrypt blocks; run it off the async workers
        let candidate = password.to_string();
        let stored_hash = record.password_hash.clone();
        let verified = tokio::task::spawn_blocking(move || bcrypt::verify(candidate, &stored_hash))
            .await
            .map_err(|e| AppError::internal(format!("password verification task failed: {}", e)))?;

        match verified {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    username_hash = %username_hash,
                    reason = "invalid_password",
                    "Login failed"
                );
                return Err(AppError::AuthenticationFailed);
            }
            Err(e) => {
                tracing::error!(
                    username_hash = %username_hash,
                    reason = "malformed_hash",
                    error = %e,
                    "Login failed: stored credential hash is unusable"
                );
                equalize_timing(password).await;
                return Err(AppError::AuthenticationFailed);
            }
        }

        let principal = Principal::new(username, record.roles);
        let issued = self.tokens.issue(&principal).map_err(|e| {
            tracing::error!(error = %e, "Failed to sign access token");
            AppError::internal("token signing failed")
        })?;

        tracing::info!(
            username_hash = %username_hash,
            roles = principal.roles.len(),
            "User logged in"
        );

        Ok((principal, issued))
    }
}
