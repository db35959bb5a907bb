// ============================================================================
// Gateway Middleware
// ============================================================================
//
// Request pipeline stages, outermost first:
// - request_context: correlation id, timing, exit log for every request
// - header_inspection: warns about oversized header blocks, never rejects
// - jwt_verification: protected routes only, installed per route group
//
// ============================================================================

use axum::{
    extract::{ConnectInfo, Request, State},
    http::{HeaderName, HeaderValue, StatusCode},
    middleware::Next,
    response::Response,
};
use chrono::Utc;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::context::{GatewayState, RequestContext};
use crate::error::AppError;
use crate::gateway::extractors::bearer_token;
use crate::utils::{extract_client_ip, HeaderVolume};

// Header names for identity propagation (Trust Boundary pattern)
pub const HEADER_USER_ID: &str = "x-user-id";
pub const HEADER_USER_ROLES: &str = "x-user-roles";
pub const HEADER_REQUEST_ID: &str = "x-request-id";

/// Emits the per-request exit record when dropped
///
/// Dropping happens on every path out of `request_context`: normal return,
/// and the future being cancelled when the client goes away.
struct ExitLog {
    context: RequestContext,
    status: Option<StatusCode>,
}

impl Drop for ExitLog {
    fn drop(&mut self) {
        let ctx = &self.context;
        let duration_ms = ctx.started.elapsed().as_millis();
        let arrived_at = ctx.arrived_at.to_rfc3339();

        match self.status {
            Some(status) if status.is_server_error() => tracing::warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                remote_addr = %ctx.remote_addr,
                arrived_at = %arrived_at,
                status = status.as_u16(),
                duration_ms = duration_ms,
                "Request completed"
            ),
            Some(status) => tracing::info!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                remote_addr = %ctx.remote_addr,
                arrived_at = %arrived_at,
                status = status.as_u16(),
                duration_ms = duration_ms,
                "Request completed"
            ),
            None => tracing::warn!(
                request_id = %ctx.request_id,
                method = %ctx.method,
                path = %ctx.path,
                remote_addr = %ctx.remote_addr,
                arrived_at = %arrived_at,
                duration_ms = duration_ms,
                "Request aborted before a response was produced"
            ),
        }
    }
}

/// Correlation/timing stage
///
/// Assigns a fresh request id (any inbound `X-Request-Id` is replaced),
/// makes the `RequestContext` available to later stages and echoes the id on
/// the response. Everything downstream runs inside a `request` span carrying
/// the id, so backend call records share it.
pub async fn request_context(mut request: Request, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let peer = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip());

    let context = RequestContext {
        request_id: request_id.clone(),
        arrived_at: Utc::now(),
        started: Instant::now(),
        method: request.method().to_string(),
        path: request.uri().path().to_string(),
        remote_addr: extract_client_ip(request.headers(), peer),
    };

    let request_id_value = HeaderValue::from_str(&request_id).ok();
    if let Some(value) = &request_id_value {
        request
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_REQUEST_ID), value.clone());
    }
    request.extensions_mut().insert(context.clone());

    let mut exit_log = ExitLog {
        context,
        status: None,
    };

    let span = tracing::info_span!("request", request_id = %request_id);
    let mut response = next.run(request).instrument(span).await;
    exit_log.status = Some(response.status());

    if let Some(value) = request_id_value {
        response
            .headers_mut()
            .insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
    }
    response
}

/// Header-volume inspection stage
///
/// Observational only: the request always continues. Sensitive headers are
/// reported by size, never by value.
pub async fn header_inspection(
    State(state): State<Arc<GatewayState>>,
    request: Request,
    next: Next,
) -> Response {
    let threshold = state.config.pipeline.max_header_bytes;
    let volume = HeaderVolume::measure(request.headers());

    if volume.total_bytes > threshold {
        let request_id = request
            .extensions()
            .get::<RequestContext>()
            .map(|ctx| ctx.request_id.clone())
            .unwrap_or_default();

        tracing::warn!(
            request_id = %request_id,
            path = %request.uri().path(),
            header_bytes = volume.total_bytes,
            threshold = threshold,
            header_count = volume.header_count,
            has_cookie = volume.cookie_bytes > 0,
            cookie_bytes = volume.cookie_bytes,
            has_authorization = volume.authorization_bytes > 0,
            authorization_bytes = volume.authorization_bytes,
            "Request headers exceed size threshold"
        );
    }

    next.run(request).await
}

/// JWT authentication verification middleware
///
/// Rejects before any handler runs when the bearer token is missing or does
/// not verify. On success the `Principal` is placed in request extensions
/// for `AuthenticatedPrincipal`.
pub async fn jwt_verification(
    State(state): State<Arc<GatewayState>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = match bearer_token(request.headers()) {
        Some(token) => token,
        None => {
            tracing::debug!(
                path = %request.uri().path(),
                "Missing or non-bearer Authorization header"
            );
            return Err(AppError::MissingCredentials);
        }
    };

    let principal = state.tokens.verify(token).map_err(|e| {
        tracing::warn!(
            error = %e,
            path = %request.uri().path(),
            token_length = token.len(),
            "JWT verification failed"
        );
        AppError::TokenInvalid(e)
    })?;

    tracing::debug!(
        path = %request.uri().path(),
        roles = principal.roles.len(),
        "JWT verified"
    );

    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}
