// ============================================================================
// Auth Service
// ============================================================================
//
// Username/password login: identity lookup, bcrypt verification, token
// issuance. Stateless; the bearer token is the only session artifact.
//
// ============================================================================

pub mod core;
pub mod handlers;

pub use self::core::Authenticator;
pub use self::handlers::{login, LoginRequest, LoginResponse};
