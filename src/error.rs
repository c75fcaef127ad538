//! Request-level errors of the inference pipeline

use thiserror::Error;

/// Errors raised while turning an upload into a prediction.
///
/// Startup failures (configuration, model loading) use `anyhow` instead;
/// these variants are the ones a single request can hit.
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("no image data was uploaded")]
    EmptyUpload,

    #[error("malformed upload: {0}")]
    Upload(String),

    #[error("upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("unsupported image format {0:?}, expected jpg, jpeg or png")]
    UnsupportedFormat(String),

    #[error("failed to decode image: {0}")]
    DecodeImage(#[from] image::ImageError),

    #[error("model inference failed: {0}")]
    Model(String),

    #[error("model returned {outputs} class scores but the label table has {labels} entries")]
    LabelTableMismatch { outputs: usize, labels: usize },

    #[error("model returned an invalid output: {0}")]
    InvalidOutput(String),
}

impl InferenceError {
    /// Short stable identifier, used as a metrics key
    pub fn kind(&self) -> &'static str {
        match self {
            InferenceError::EmptyUpload => "empty_upload",
            InferenceError::Upload(_) => "upload",
            InferenceError::PayloadTooLarge(_) => "payload_too_large",
            InferenceError::UnsupportedFormat(_) => "unsupported_format",
            InferenceError::DecodeImage(_) => "decode_image",
            InferenceError::Model(_) => "model",
            InferenceError::LabelTableMismatch { .. } => "label_table_mismatch",
            InferenceError::InvalidOutput(_) => "invalid_output",
        }
    }

    /// Whether the failure was caused by the client's input rather than the model
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            InferenceError::EmptyUpload
                | InferenceError::Upload(_)
                | InferenceError::PayloadTooLarge(_)
                | InferenceError::UnsupportedFormat(_)
                | InferenceError::DecodeImage(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_label_mismatch_message() {
        let err = InferenceError::LabelTableMismatch {
            outputs: 38,
            labels: 10,
        };
        assert_eq!(
            err.to_string(),
            "model returned 38 class scores but the label table has 10 entries"
        );
        assert_eq!(err.kind(), "label_table_mismatch");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_decode_error_is_client_error() {
        let err = image::load_from_memory(b"not an image").unwrap_err();
        let err = InferenceError::from(err);
        assert_eq!(err.kind(), "decode_image");
        assert!(err.is_client_error());
    }
}
