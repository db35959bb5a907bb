use axum::{extract::State, Json};
use std::sync::Arc;

use crate::context::GatewayState;
use crate::gateway::circuit_breaker::CircuitSnapshot;

/// Liveness: the process is up and serving
pub async fn health_check() -> &'static str {
    "ok"
}

/// Breaker state per backend service contacted so far
pub async fn circuits(State(state): State<Arc<GatewayState>>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.proxy.circuit_states().await)
}
