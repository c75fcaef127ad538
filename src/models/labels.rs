//! Class label table mapping model output positions to disease names

use anyhow::{bail, Context, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

use crate::config::ModelConfig;
use crate::error::InferenceError;

/// Labels of the bundled leaf classifier, in model output order
pub const DEFAULT_CLASS_NAMES: [&str; 10] = [
    "Apple Scab",
    "Apple Black Rot",
    "Apple Cedar Rust",
    "Apple Healthy",
    "Potato Early Blight",
    "Potato Late Blight",
    "Potato Healthy",
    "Tomato Mosaic Virus",
    "Tomato Yellow Curl Virus",
    "Tomato Healthy",
];

/// Ordered list of class names; index `i` names output position `i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassLabelTable {
    labels: Vec<String>,
}

impl ClassLabelTable {
    /// Build a table, rejecting empty tables and duplicate names
    pub fn new(labels: Vec<String>) -> Result<Self> {
        if labels.is_empty() {
            bail!("Class label table is empty");
        }

        let mut seen = HashSet::new();
        for label in &labels {
            if label.trim().is_empty() {
                bail!("Class label table contains a blank label");
            }
            if !seen.insert(label.as_str()) {
                bail!("Class label table contains duplicate label {:?}", label);
            }
        }

        Ok(Self { labels })
    }

    /// Resolve the table from configuration: file, then inline list, then defaults
    pub fn from_config(config: &ModelConfig) -> Result<Self> {
        let table = if let Some(path) = &config.labels_path {
            Self::from_file(path)?
        } else if let Some(labels) = &config.labels {
            Self::new(labels.clone())?
        } else {
            Self::default()
        };

        info!(classes = table.len(), "Class label table loaded");
        Ok(table)
    }

    /// Read one label per line; blank lines and `#` comments are skipped
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read class labels from {}", path.display()))?;

        let labels = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect();

        Self::new(labels).with_context(|| format!("Invalid class labels in {}", path.display()))
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&str> {
        self.labels.get(index).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.labels.iter().map(String::as_str)
    }

    /// Check that a probability vector lines up with this table
    pub fn check_outputs(&self, outputs: usize) -> Result<(), InferenceError> {
        if outputs != self.labels.len() {
            return Err(InferenceError::LabelTableMismatch {
                outputs,
                labels: self.labels.len(),
            });
        }
        Ok(())
    }
}

impl Default for ClassLabelTable {
    fn default() -> Self {
        Self {
            labels: DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}
