//! Axum HTTP server for the dashboard backend.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::ServerConfig;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::store::VersionedStore;

use super::identity::FAMILY_CODE_HEADER;
use super::routes;

/// Shared state for all handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    pub store: Arc<VersionedStore>,
    /// Supplies the default version (current year) for record routes.
    pub clock: Arc<dyn Clock>,
}

impl AppState {
    pub fn new(gateway: Arc<Gateway>, store: Arc<VersionedStore>) -> Self {
        Self {
            gateway,
            store,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

fn cors_layer(config: &ServerConfig) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            HeaderName::from_static("content-type"),
            HeaderName::from_static(FAMILY_CODE_HEADER),
        ]);
    if config.cors_origins.is_empty() {
        return layer.allow_origin(Any);
    }
    let origins: Vec<HeaderValue> = config
        .cors_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(v) => Some(v),
            Err(_) => {
                warn!("Ignoring invalid CORS origin '{}'", o);
                None
            }
        })
        .collect();
    layer.allow_origin(AllowOrigin::list(origins))
}

/// Build the router with all routes.
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let shared_state = Arc::new(state);

    Router::new()
        .route("/health", get(routes::health::get_health))
        // AI gateway
        .route("/ai/invoke", post(routes::ai::invoke))
        // Versioned records
        .route("/records", get(routes::records::list_records))
        .route(
            "/records/{entity_id}",
            get(routes::records::get_record)
                .put(routes::records::put_record)
                .delete(routes::records::delete_record),
        )
        .route(
            "/records/{entity_id}/propagate",
            post(routes::records::propagate),
        )
        .layer(DefaultBodyLimit::max(config.body_limit_bytes))
        .layer(cors_layer(config))
        .layer(TraceLayer::new_for_http())
        .with_state(shared_state)
}

/// Bind and serve until Ctrl-C.
pub async fn start_server(config: &ServerConfig, state: AppState) -> Result<()> {
    let app = build_router(state, config);
    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("stockdesk listening on {addr}");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;
    info!("stockdesk stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
}
