//! Type definitions for the plant disease detector

pub mod prediction;
pub mod upload;

pub use prediction::{ClassScore, Prediction};
pub use upload::{ImageKind, UploadedImage};
