// ============================================================================
// API Gateway
// ============================================================================
//
// Single entry point in front of the backend services. It handles:
// - Request correlation, timing and header-volume inspection
// - JWT authentication verification
// - Request routing to backend services by name
// - Circuit breaking and fallbacks for every backend call
//
// Architecture:
// - Stateless (can scale horizontally)
// - Identity is propagated downstream as trusted headers
//
// ============================================================================

pub mod circuit_breaker;
pub mod discovery;
pub mod extractors;
pub mod middleware;
pub mod proxy;
pub mod router;

pub use circuit_breaker::{CircuitBreaker, CircuitState};
pub use discovery::{ServiceDiscovery, StaticServiceDiscovery};
pub use proxy::{ProxiedCall, ResilientProxy};
