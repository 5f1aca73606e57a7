//! Router assembly and server lifecycle.
//!
//! Routes split into a public set (`/`, `/health`, `/ready`, `/metrics`)
//! and the search API nested under `/api/v1/search`. The middleware stack
//! adds request ids, caller identity, structured request logging,
//! compression, CORS, and a coarse outer timeout; the tighter per-query
//! deadline is enforced inside the search handlers.

use axum::middleware::from_fn;
use axum::routing::{get, post};
use axum::Router;
use registry::RegistryReader;
use search::CoreConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::middleware::{caller_identity, log_requests, request_id};
use crate::routes::{admin, api_info, details, health, not_found, search};
use crate::state::ServerState;

pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let public_routes = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics));

    let search_routes = Router::new()
        .route("/", post(search::search_post).get(search::search_get))
        .route("/similar/{service_id}", get(search::similar))
        .route("/tools/{tool_id}/{view}", get(details::tool_detail))
        .route("/status", get(admin::status))
        .route("/rebuild", post(admin::rebuild))
        .route("/initialize", post(admin::initialize));

    Router::new()
        .merge(public_routes)
        .nest("/api/v1/search", search_routes)
        .fallback(not_found)
        .layer(TimeoutLayer::new(state.config.timeout()))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(caller_identity))
        // Layers run outermost-last: request ids are minted before the
        // request logger reads them.
        .layer(from_fn(log_requests))
        .layer(from_fn(request_id))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the KPATH HTTP server and block until shutdown.
///
/// Initialization order: structured logging, shared state (which builds
/// the embedding backend and the search core), snapshot load with a
/// background build fallback, then the listener. SIGTERM and Ctrl-C both
/// trigger a graceful drain.
pub async fn start_server(
    config: ServerConfig,
    core: CoreConfig,
    registry: Arc<dyn RegistryReader>,
) -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_target(false)
        .json()
        .init();

    let state = Arc::new(ServerState::new(config.clone(), &core, registry)?);
    state.initialize();

    let app = build_router(state);
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        addr = %addr,
        timeout_secs = config.timeout_secs,
        metrics = config.metrics_enabled,
        "starting kpath server"
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
