// ============================================================================
// Edge Gateway
// ============================================================================
//
// Authenticating API gateway: issues bearer tokens at login, verifies them on
// every protected request and forwards calls to backend services behind a
// per-service circuit breaker.
//
// ============================================================================

use anyhow::{Context, Result};
use axum::{
    middleware,
    routing::{any, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub mod auth;
pub mod auth_service;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod health;
pub mod identity;
pub mod utils;

use config::{Config, LogFormat, LoggingConfig};
use context::GatewayState;
use gateway::middleware::{header_inspection, jwt_verification, request_context};
use gateway::router::route_request;

/// Assemble routes and the request pipeline
///
/// JWT verification wraps only the proxied routes.
pub fn create_router(state: Arc<GatewayState>) -> Router {
    let protected = Router::new()
        .route("/api/v1/:service", any(route_request))
        .route("/api/v1/:service/*rest", any(route_request))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            jwt_verification,
        ));

    let routes = Router::new()
        // Public endpoints
        .route("/health", get(health::health_check))
        .route("/health/live", get(health::health_check))
        .route("/health/circuits", get(health::circuits))
        .route("/login", post(auth_service::login))
        .route("/api/auth/login", post(auth_service::login))
        .merge(protected);

    with_pipeline(routes, state)
}

/// Wrap `routes` in the request pipeline and attach the state
///
/// Order, outermost first: trace span, correlation/timing, panic guard,
/// header inspection.
pub fn with_pipeline(routes: Router<Arc<GatewayState>>, state: Arc<GatewayState>) -> Router {
    routes
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(middleware::from_fn(request_context))
                .layer(CatchPanicLayer::new())
                .layer(middleware::from_fn_with_state(
                    state.clone(),
                    header_inspection,
                ))
                .into_inner(),
        )
        .with_state(state)
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_new(&config.rust_log)
        .with_context(|| format!("Invalid RUST_LOG directive: {}", config.rust_log))?;

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init(),
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    installed.context("Failed to install tracing subscriber")
}

/// Build the gateway from `config` and serve until Ctrl-C / SIGTERM
pub async fn run(config: Config) -> Result<()> {
    let config = Arc::new(config);

    info!("=== Edge Gateway Starting ===");
    info!("Port: {}", config.port);
    info!("Identity service: {}", config.identity.base_url);
    info!(
        "Circuit breaker: window={} minimum_calls={} failure_rate={}% open={:?}",
        config.services.circuit_breaker.window_size,
        config.services.circuit_breaker.minimum_calls,
        config.services.circuit_breaker.failure_rate_threshold,
        config.services.circuit_breaker.open_duration
    );

    let state = GatewayState::build(config.clone())?;
    let app = create_router(state);

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port)
        .parse()
        .context("Failed to parse bind address")?;

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    info!("Edge Gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("Failed to start server")?;

    info!("Edge Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received. Shutting down...");
}
