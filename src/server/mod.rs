//! HTTP API
//!
//! - `GET /health`: liveness and the device the model runs on
//! - `POST /predict`: multipart upload (field `file`) classified as real or fake

pub mod error;
pub mod routes;
pub mod state;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::config::ServerConfig;
use crate::utils::error::Result;
use crate::utils::format_bytes;

pub use error::ErrorResponse;
pub use state::{AppState, SharedState};

/// Build the router with its middleware
pub fn router(state: SharedState, config: &ServerConfig) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/predict", post(routes::predict::predict))
        .with_state(state)
        .layer(DefaultBodyLimit::max(config.max_upload_bytes()))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Bind the listener and serve until the process is stopped
pub async fn serve(state: SharedState, config: &ServerConfig) -> Result<()> {
    let addr = config.socket_addr()?;
    let app = router(state, config);

    info!("Upload limit: {}", format_bytes(config.max_upload_bytes() as u64));
    info!("Starting server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
