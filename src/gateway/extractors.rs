use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};

use crate::auth::Principal;
use crate::context::RequestContext;
use crate::error::AppError;

/// Token from an `Authorization: Bearer <token>` header
///
/// The scheme is matched case-insensitively. Any other scheme, or an empty
/// token, is treated as no credentials at all.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Principal verified by `jwt_verification` for this request
///
/// Handlers behind the JWT middleware take this instead of re-reading the
/// token. Rejects with 401 when the middleware did not run.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal(pub Principal);

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .map(AuthenticatedPrincipal)
            .ok_or(AppError::MissingCredentials)
    }
}

/// Context created by the correlation stage
#[derive(Debug, Clone)]
pub struct Correlation(pub RequestContext);

#[async_trait]
impl<S> FromRequestParts<S> for Correlation
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestContext>()
            .cloned()
            .map(Correlation)
            .ok_or_else(|| AppError::internal("request context missing, correlation stage not installed"))
    }
}
