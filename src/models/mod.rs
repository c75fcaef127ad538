//! Classifier loading and inference components

pub mod inference;
pub mod labels;
pub mod loader;

pub use inference::InferencePipeline;
pub use labels::ClassLabelTable;
pub use loader::{Classifier, ModelLoader, OnnxClassifier};
