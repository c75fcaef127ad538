//! Plant Disease Detector Library
//!
//! Classifies uploaded leaf photos with a pre-trained ONNX model and serves
//! the result through a single-page web UI.

pub mod config;
pub mod error;
pub mod metrics;
pub mod models;
pub mod preprocess;
pub mod server;
pub mod types;

pub use config::AppConfig;
pub use error::InferenceError;
pub use models::inference::InferencePipeline;
pub use models::labels::ClassLabelTable;
pub use models::loader::{shared_classifier, Classifier, ModelLoader};
pub use preprocess::{ImageBatch, ImagePreprocessor};
pub use types::{prediction::Prediction, upload::UploadedImage};
