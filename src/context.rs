use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Instant;

use crate::auth::TokenService;
use crate::auth_service::Authenticator;
use crate::config::Config;
use crate::gateway::discovery::{ServiceDiscovery, StaticServiceDiscovery};
use crate::gateway::proxy::ResilientProxy;
use crate::identity::{HttpIdentityClient, IdentityLookup};

/// Shared gateway dependencies, built once at startup and passed explicitly
/// to handlers and middleware.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub tokens: Arc<TokenService>,
    pub authenticator: Authenticator,
    pub proxy: ResilientProxy,
    pub discovery: Box<dyn ServiceDiscovery>,
}

impl GatewayState {
    /// Wire every component from configuration
    pub fn build(config: Arc<Config>) -> Result<Arc<Self>> {
        let identity = Arc::new(HttpIdentityClient::new(&config.identity)?);
        Self::with_identity(config, identity)
    }

    /// Same as `build`, with the identity backend supplied by the caller
    pub fn with_identity(
        config: Arc<Config>,
        identity: Arc<dyn IdentityLookup>,
    ) -> Result<Arc<Self>> {
        let tokens = Arc::new(TokenService::new(&config.auth)?);
        let authenticator = Authenticator::new(
            identity,
            tokens.clone(),
            config.logging.hash_salt.clone(),
        );
        let proxy = ResilientProxy::new(&config.services)?;
        let discovery = Box::new(StaticServiceDiscovery::new(
            config.services.registry.clone(),
        ));

        Ok(Arc::new(Self {
            config,
            tokens,
            authenticator,
            proxy,
            discovery,
        }))
    }
}

/// Per-request context created by the correlation stage
///
/// Travels in request extensions to every later stage and to the backend
/// call, so log records from one request share `request_id`.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: String,
    pub arrived_at: DateTime<Utc>,
    pub started: Instant,
    pub method: String,
    pub path: String,
    pub remote_addr: String,
}
