// ============================================================================
// Service Discovery
// ============================================================================
//
// Resolves a service name to its base URL. Only the static registry loaded
// from configuration is supported.
//
// ============================================================================

use crate::config::ServiceRegistry;

/// Service discovery abstraction
pub trait ServiceDiscovery: Send + Sync {
    /// Base URL (no trailing slash) for `service`, if it is known
    fn service_url(&self, service: &str) -> Option<String>;
}

/// Static service discovery (from config)
pub struct StaticServiceDiscovery {
    registry: ServiceRegistry,
}

impl StaticServiceDiscovery {
    pub fn new(registry: ServiceRegistry) -> Self {
        for name in registry.names() {
            tracing::info!(
                service = name,
                url = registry.get(name).unwrap_or_default(),
                "Registered backend service"
            );
        }
        Self { registry }
    }
}

impl ServiceDiscovery for StaticServiceDiscovery {
    fn service_url(&self, service: &str) -> Option<String> {
        self.registry.get(service).map(str::to_string)
    }
}
