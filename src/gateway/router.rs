// ============================================================================
// Gateway Router
// ============================================================================
//
// Routes authenticated requests to backend services by name:
//   /api/v1/{service}/{rest..}  →  {service base URL}/{rest..}?{query}
//
// The service name must be in the static registry; anything else is 404.
// The backend call goes through the resilient proxy, so an unhealthy backend
// yields a 503 fallback instead of an error.
//
// ============================================================================

use axum::{
    body::to_bytes,
    extract::{Path, Request, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth::Principal;
use crate::context::{GatewayState, RequestContext};
use crate::error::AppError;
use crate::gateway::extractors::{AuthenticatedPrincipal, Correlation};
use crate::gateway::middleware::{HEADER_REQUEST_ID, HEADER_USER_ID, HEADER_USER_ROLES};
use crate::gateway::proxy::{is_hop_by_hop, ProxiedCall};

/// Prefix under which backend services are mounted
pub const SERVICE_PREFIX: &str = "/api/v1/";

/// Largest request body buffered for forwarding (10 MiB)
const MAX_FORWARD_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Route request to the named backend service
pub async fn route_request(
    State(state): State<Arc<GatewayState>>,
    Path(params): Path<HashMap<String, String>>,
    AuthenticatedPrincipal(principal): AuthenticatedPrincipal,
    Correlation(ctx): Correlation,
    request: Request,
) -> Result<Response, AppError> {
    // Registry names are lowercase
    let service = params
        .get("service")
        .map(|name| name.to_ascii_lowercase())
        .ok_or_else(|| AppError::not_found("service"))?;

    let base_url = state.discovery.service_url(&service).ok_or_else(|| {
        tracing::debug!(request_id = %ctx.request_id, service = %service, "Unknown service");
        AppError::not_found(format!("service '{}'", service))
    })?;

    let (parts, body) = request.into_parts();
    let url = format!(
        "{}{}",
        base_url,
        forwarded_path_and_query(parts.uri.path(), parts.uri.query())
    );

    let body = to_bytes(body, MAX_FORWARD_BODY_BYTES)
        .await
        .map_err(|e| AppError::validation(format!("unreadable request body: {}", e)))?;

    let mut call = ProxiedCall::new(parts.method, url)
        .headers(downstream_headers(&parts.headers, &principal, &ctx));
    if !body.is_empty() {
        call = call.body(body);
    }

    tracing::debug!(
        request_id = %ctx.request_id,
        service = %service,
        url = %call.url,
        "Forwarding request"
    );

    let fallback_service = service.clone();
    Ok(state
        .proxy
        .forward(&service, call, move || backend_unavailable(fallback_service))
        .await)
}

/// Fallback for routed calls: 503 naming the service
pub fn backend_unavailable(service: String) -> Response {
    let body = AppError::BackendUnavailable(service).body();
    (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
}

/// Path and query to send to the backend: everything after
/// `/api/v1/{service}`, always starting with `/`
pub fn forwarded_path_and_query(path: &str, query: Option<&str>) -> String {
    let rest = path
        .strip_prefix(SERVICE_PREFIX)
        .and_then(|p| p.find('/').map(|i| &p[i..]))
        .unwrap_or("/");

    let mut forwarded = rest.to_string();
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        forwarded.push('?');
        forwarded.push_str(query);
    }
    forwarded
}

/// Inbound headers minus hop-by-hop ones, plus trusted identity headers
///
/// Trusted headers are always overwritten, so a caller cannot inject its own
/// `X-User-Id`.
fn downstream_headers(inbound: &HeaderMap, principal: &Principal, ctx: &RequestContext) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (name, value) in inbound.iter() {
        if is_hop_by_hop(name) || is_trusted_header(name) {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    let roles = principal.roles.iter().cloned().collect::<Vec<_>>().join(",");
    for (name, value) in [
        (HEADER_USER_ID, principal.subject.as_str()),
        (HEADER_USER_ROLES, roles.as_str()),
        (HEADER_REQUEST_ID, ctx.request_id.as_str()),
    ] {
        match HeaderValue::from_str(value) {
            Ok(value) => {
                headers.insert(HeaderName::from_static(name), value);
            }
            Err(_) => {
                tracing::warn!(
                    request_id = %ctx.request_id,
                    header = name,
                    "Value not representable as a header, omitted"
                );
            }
        }
    }
    headers
}

fn is_trusted_header(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        HEADER_USER_ID | HEADER_USER_ROLES | HEADER_REQUEST_ID
    )
}
