//! HTTP API
//!
//! `POST /predict`, `POST /recommendations` and `GET /health` on top of a
//! shared `AppContext`.

pub mod error;
pub mod form;
pub mod routes;
pub mod state;

use std::any::Any;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any as AnyOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::utils::error::Result;

pub use error::ApiError;
pub use form::{allowed_file, FormFields, UploadedFile};
pub use state::{AppContext, SharedState};

/// Turn a handler panic into a JSON 500
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let message = if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else {
        "Internal server error".to_string()
    };
    error!("Handler panicked: {}", message);
    ApiError::Internal(message).into_response()
}

fn cors_layer(origin: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods(AnyOrigin)
        .allow_headers(AnyOrigin);

    match origin {
        "*" => layer.allow_origin(AnyOrigin),
        origin => match origin.parse::<HeaderValue>() {
            Ok(value) => layer.allow_origin(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                layer
            }
        },
    }
}

/// Build the router with all routes and middleware
pub fn router(state: SharedState) -> Router {
    let body_limit = state.api.max_upload_bytes;
    let cors = cors_layer(&state.api.cors_origin);

    Router::new()
        // Health check
        .route("/health", get(routes::health::health_check))

        // Diagnosis and advice
        .route("/predict", post(routes::predict::predict))
        .route("/recommendations", post(routes::recommendations::recommendations))

        // Add state
        .with_state(state)

        // Add middleware
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(CatchPanicLayer::custom(panic_response))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
}

/// Serve the API until the process is stopped
pub async fn serve(state: SharedState) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", state.api.host, state.api.port)
        .parse()
        .map_err(|e| {
            crate::utils::error::DiagnosisError::Config(format!("Invalid listen address: {}", e))
        })?;

    let app = router(state);

    info!("Starting server on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
