//! Request handlers

use axum::{
    extract::{multipart::MultipartError, Multipart, State},
    http::StatusCode,
    response::Html,
    Json,
};
use serde::Serialize;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::error::InferenceError;
use crate::metrics::MetricsSnapshot;
use crate::server::page::{self, PageView};
use crate::server::SharedState;
use crate::types::prediction::Prediction;
use crate::types::upload::{ImageKind, UploadedImage};

/// Multipart field carrying the image
pub const UPLOAD_FIELD: &str = "file";

/// GET / - upload form, no inference
pub async fn index() -> Html<String> {
    Html(page::render(&PageView::Idle))
}

/// POST / - classify the uploaded leaf and render the result card
pub async fn predict_page(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> (StatusCode, Html<String>) {
    let upload = match read_upload(multipart).await {
        Ok(Some(upload)) => upload,
        // Submitted without choosing a file: stay idle
        Ok(None) => return (StatusCode::OK, Html(page::render(&PageView::Idle))),
        Err(e) => return error_page(&state, e),
    };

    match classify_upload(&state, upload).await {
        Ok((upload, kind, prediction)) => {
            let html = page::render(&PageView::Result {
                upload: &upload,
                kind,
                prediction: &prediction,
            });
            (StatusCode::OK, Html(html))
        }
        Err(e) => error_page(&state, e),
    }
}

/// POST /api/predict - classify the uploaded leaf and return JSON
pub async fn predict_json(
    State(state): State<SharedState>,
    multipart: Multipart,
) -> Result<Json<Prediction>, InferenceError> {
    let outcome = match read_upload(multipart).await {
        Ok(Some(upload)) => classify_upload(&state, upload).await,
        Ok(None) => Err(InferenceError::EmptyUpload),
        Err(e) => Err(e),
    };

    match outcome {
        Ok((_, _, prediction)) => Ok(Json(prediction)),
        Err(e) => {
            record_failure(&state, &e);
            Err(e)
        }
    }
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub model: String,
    pub classes: usize,
}

/// GET /health - Health check endpoint
pub async fn health_check(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.uptime_seconds(),
        model: state.pipeline.model_name().to_string(),
        classes: state.pipeline.labels().len(),
    })
}

/// GET /api/stats - metrics snapshot
pub async fn stats(State(state): State<SharedState>) -> Json<MetricsSnapshot> {
    Json(state.metrics.snapshot())
}

/// Pull the image part out of the form; `None` when no file was chosen
async fn read_upload(mut multipart: Multipart) -> Result<Option<UploadedImage>, InferenceError> {
    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let file_name = field
            .file_name()
            .filter(|name| !name.is_empty())
            .map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await.map_err(upload_error)?;

        // Browsers send an empty, unnamed part when the picker was left blank
        if bytes.is_empty() && file_name.is_none() {
            return Ok(None);
        }

        return Ok(Some(UploadedImage {
            file_name,
            content_type,
            bytes: bytes.to_vec(),
        }));
    }

    Ok(None)
}

/// Oversized bodies surface as multipart errors carrying a 413 status
fn upload_error(e: MultipartError) -> InferenceError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        InferenceError::PayloadTooLarge(e.body_text())
    } else {
        InferenceError::Upload(e.body_text())
    }
}

/// Validate and classify an upload off the async runtime
async fn classify_upload(
    state: &SharedState,
    upload: UploadedImage,
) -> Result<(UploadedImage, ImageKind, Prediction), InferenceError> {
    let start = Instant::now();

    let worker_state = state.clone();
    let (upload, result) = tokio::task::spawn_blocking(move || {
        let result = worker_state.pipeline.classify_upload(&upload);
        (upload, result)
    })
    .await
    .map_err(|e| InferenceError::Model(format!("inference task failed: {e}")))?;

    let (kind, prediction) = result?;
    let elapsed = start.elapsed();

    state
        .metrics
        .record_prediction(elapsed, &prediction.label, prediction.confidence);

    info!(
        prediction_id = %prediction.id,
        file = %upload.display_name(),
        label = %prediction.label,
        confidence = prediction.confidence,
        processing_time_us = elapsed.as_micros(),
        "Leaf classified"
    );

    Ok((upload, kind, prediction))
}

fn error_page(state: &SharedState, e: InferenceError) -> (StatusCode, Html<String>) {
    record_failure(state, &e);
    let status = e.status_code();
    let html = page::render(&PageView::Error {
        message: e.to_string(),
    });
    (status, Html(html))
}

fn record_failure(state: &SharedState, e: &InferenceError) {
    state.metrics.record_failure(e.kind());
    if e.is_client_error() {
        warn!(error = %e, kind = e.kind(), "Rejected upload");
    } else {
        error!(error = %e, kind = e.kind(), "Inference failed");
    }
}
