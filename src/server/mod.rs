//! HTTP front end: upload page, JSON API and health endpoints

pub mod page;
pub mod routes;

use anyhow::Result;
use axum::{
    extract::DefaultBodyLimit,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::InferenceError;
use crate::metrics::InferenceMetrics;
use crate::models::inference::InferencePipeline;

/// Shared application state
pub struct AppState {
    pub pipeline: InferencePipeline,
    pub metrics: Arc<InferenceMetrics>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(pipeline: InferencePipeline, metrics: Arc<InferenceMetrics>) -> Self {
        Self {
            pipeline,
            metrics,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;

/// Build the application router
pub fn router(state: SharedState, body_limit_bytes: usize) -> Router {
    Router::new()
        .route("/", get(routes::index).post(routes::predict_page))
        .route("/api/predict", axum::routing::post(routes::predict_json))
        .route("/api/stats", get(routes::stats))
        .route("/health", get(routes::health_check))
        .layer(DefaultBodyLimit::max(body_limit_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve until the shutdown future resolves
pub async fn serve<F>(address: &str, app: Router, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(address).await?;
    info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}

impl InferenceError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            InferenceError::EmptyUpload | InferenceError::Upload(_) => StatusCode::BAD_REQUEST,
            InferenceError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            InferenceError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            InferenceError::DecodeImage(_) => StatusCode::UNPROCESSABLE_ENTITY,
            InferenceError::Model(_)
            | InferenceError::LabelTableMismatch { .. }
            | InferenceError::InvalidOutput(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for InferenceError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (self.status_code(), body).into_response()
    }
}
