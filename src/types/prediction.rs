//! Prediction data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A class paired with its explicit output index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassScore {
    /// Position in the model output vector
    pub class_index: usize,
    /// Label from the class label table
    pub label: String,
    /// Probability in [0, 1]
    pub probability: f32,
}

/// Result of classifying one uploaded image
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    /// Unique prediction identifier
    pub id: String,

    /// Predicted disease label
    pub label: String,

    /// Index of the predicted class in the model output
    pub class_index: usize,

    /// Confidence percentage in [0, 100]
    pub confidence: f32,

    /// Best classes, highest probability first
    pub top_k: Vec<ClassScore>,

    /// Model name that produced the prediction
    pub model: String,

    /// Inference time in milliseconds (preprocessing included)
    pub inference_time_ms: f64,

    /// Prediction timestamp
    pub created_at: DateTime<Utc>,
}

impl Prediction {
    /// Create a new prediction for the winning class
    pub fn new(best: &ClassScore, model: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            label: best.label.clone(),
            class_index: best.class_index,
            confidence: (best.probability * 100.0).clamp(0.0, 100.0),
            top_k: Vec::new(),
            model: model.into(),
            inference_time_ms: 0.0,
            created_at: Utc::now(),
        }
    }

    /// Attach the ranked runner-up classes
    pub fn with_top_k(mut self, top_k: Vec<ClassScore>) -> Self {
        self.top_k = top_k;
        self
    }

    pub fn with_inference_time_ms(mut self, inference_time_ms: f64) -> Self {
        self.inference_time_ms = inference_time_ms;
        self
    }

    /// Confidence as shown to users, e.g. `92.30%`
    pub fn confidence_display(&self) -> String {
        format!("{:.2}%", self.confidence)
    }
}
