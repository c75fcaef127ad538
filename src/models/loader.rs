//! ONNX classifier loader and the process-wide model cache

use anyhow::{bail, Context, Result};
use once_cell::sync::OnceCell;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::config::ModelConfig;
use crate::error::InferenceError;
use crate::preprocess::ImageBatch;

/// Anything that maps a preprocessed image batch to per-class probabilities.
///
/// Returns one probability vector per image in the batch, in model output order.
pub trait Classifier: Send + Sync {
    /// Human readable model identifier
    fn name(&self) -> &str;

    fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<f32>>, InferenceError>;
}

/// Loaded ONNX image classifier
pub struct OnnxClassifier {
    /// Model file the session was built from
    path: PathBuf,
    /// ONNX Runtime session; `run` needs exclusive access
    session: Mutex<Session>,
    /// Input name for the model
    input_name: String,
    /// Output name for class probabilities
    output_name: String,
}

impl OnnxClassifier {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn input_name(&self) -> &str {
        &self.input_name
    }

    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

impl Classifier for OnnxClassifier {
    fn name(&self) -> &str {
        self.path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("onnx")
    }

    fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<f32>>, InferenceError> {
        let input_tensor = Tensor::from_array((batch.shape_i64(), batch.data().to_vec()))
            .map_err(|e| InferenceError::Model(format!("failed to create input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|_| InferenceError::Model("session lock poisoned".to_string()))?;

        let outputs = session
            .run(ort::inputs![&self.input_name => input_tensor])
            .map_err(|e| InferenceError::Model(e.to_string()))?;

        let output = outputs.get(&self.output_name).ok_or_else(|| {
            InferenceError::InvalidOutput(format!("missing output {:?}", self.output_name))
        })?;

        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::InvalidOutput(e.to_string()))?;
        let dims: Vec<i64> = shape.iter().copied().collect();

        let rows = split_rows(&dims, data, batch.batch_size())?;
        debug!(model = %self.name(), dims = ?dims, "Classifier output extracted");
        Ok(rows)
    }
}

/// Split a flat `[batch, classes]` (or `[classes]`) output into per-image rows
fn split_rows(
    dims: &[i64],
    data: &[f32],
    batch_size: usize,
) -> Result<Vec<Vec<f32>>, InferenceError> {
    let classes = match dims {
        [classes] => *classes as usize,
        [rows, classes] if *rows as usize == batch_size => *classes as usize,
        _ => {
            return Err(InferenceError::InvalidOutput(format!(
                "unexpected output shape {dims:?} for batch of {batch_size}"
            )))
        }
    };

    if classes == 0 || data.len() != classes * batch_size.max(1) {
        return Err(InferenceError::InvalidOutput(format!(
            "output shape {dims:?} does not match {} values",
            data.len()
        )));
    }

    Ok(data.chunks(classes).map(<[f32]>::to_vec).collect())
}

/// Loader for ONNX classifiers
pub struct ModelLoader {
    /// Number of threads for ONNX inference
    onnx_threads: usize,
}

impl ModelLoader {
    /// Create a new model loader with default settings (1 thread)
    pub fn new() -> Self {
        Self::with_threads(1)
    }

    /// Create a new model loader with specified number of threads
    pub fn with_threads(onnx_threads: usize) -> Self {
        match ort::init().with_name("plant-disease-detector").commit() {
            Ok(true) => debug!(onnx_threads = onnx_threads, "ONNX Runtime initialized"),
            Ok(false) => debug!("ONNX Runtime environment already initialized"),
            Err(e) => warn!(error = %e, "Failed to initialize ONNX Runtime environment"),
        }
        Self { onnx_threads }
    }

    /// Load a serialized classifier from file.
    ///
    /// Fails when the file is missing or is not a loadable ONNX graph.
    pub fn load_model<P: AsRef<Path>>(&self, path: P) -> Result<OnnxClassifier> {
        let path = path.as_ref();

        if !path.is_file() {
            bail!("Model file not found: {}", path.display());
        }

        info!(path = %path.display(), threads = self.onnx_threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(self.onnx_threads)?
            .commit_from_file(path)
            .with_context(|| format!("Failed to load model from {}", path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .context("Model declares no inputs")?;

        let output_name = session
            .outputs
            .iter()
            .find(|o| {
                let name = o.name.to_lowercase();
                name.contains("prob") || name.contains("softmax") || name.contains("output")
            })
            .or_else(|| session.outputs.first())
            .map(|o| o.name.clone())
            .context("Model declares no outputs")?;

        info!(
            input = %input_name,
            output = %output_name,
            "Model loaded successfully"
        );

        Ok(OnnxClassifier {
            path: path.to_path_buf(),
            session: Mutex::new(session),
            input_name,
            output_name,
        })
    }
}

impl Default for ModelLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// Initialize-once holder for a loaded model.
pub struct ModelCache<T> {
    cell: OnceCell<Arc<T>>,
}

impl<T> ModelCache<T> {
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::new(),
        }
    }

    /// Return the cached model, running `load` only if nothing is cached yet.
    ///
    /// A failed load leaves the cache empty.
    pub fn get_or_load<F>(&self, load: F) -> Result<Arc<T>>
    where
        F: FnOnce() -> Result<T>,
    {
        self.cell
            .get_or_try_init(|| load().map(Arc::new))
            .map(Arc::clone)
    }

    pub fn get(&self) -> Option<Arc<T>> {
        self.cell.get().cloned()
    }

    pub fn is_loaded(&self) -> bool {
        self.cell.get().is_some()
    }
}

impl<T> Default for ModelCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

static SHARED_CLASSIFIER: ModelCache<OnnxClassifier> = ModelCache::new();

/// Process-wide classifier, loaded from `config.path` on first use.
pub fn shared_classifier(config: &ModelConfig) -> Result<Arc<OnnxClassifier>> {
    let classifier = SHARED_CLASSIFIER.get_or_load(|| {
        ModelLoader::with_threads(config.onnx_threads).load_model(&config.path)
    })?;

    if classifier.path() != config.path.as_path() {
        warn!(
            cached = %classifier.path().display(),
            requested = %config.path.display(),
            "Classifier already loaded, ignoring requested path"
        );
    }

    Ok(classifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_missing_model_fails() {
        let result = ModelLoader::new().load_model("outputs/does_not_exist.onnx");
        let err = result.err().unwrap();
        assert!(err.to_string().contains("Model file not found"));
    }

    #[test]
    fn test_repeated_runtime_init_is_tolerated() {
        let first = ModelLoader::with_threads(2);
        let second = ModelLoader::with_threads(4);
        assert_eq!(first.onnx_threads, 2);
        assert_eq!(second.onnx_threads, 4);
    }

    #[test]
    fn test_malformed_model_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), b"definitely not onnx").unwrap();

        assert!(ModelLoader::new().load_model(file.path()).is_err());
    }

    #[test]
    fn test_cache_loads_once() {
        let cache: ModelCache<String> = ModelCache::new();
        let loads = AtomicUsize::new(0);

        let load = || {
            loads.fetch_add(1, Ordering::SeqCst);
            Ok("model".to_string())
        };

        let first = cache.get_or_load(load).unwrap();
        let second = cache.get_or_load(load).unwrap();

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_cache_stays_empty_after_failure() {
        let cache: ModelCache<String> = ModelCache::new();

        assert!(cache
            .get_or_load(|| anyhow::bail!("missing model"))
            .is_err());
        assert!(!cache.is_loaded());

        let model = cache.get_or_load(|| Ok("retry".to_string())).unwrap();
        assert_eq!(model.as_str(), "retry");
    }

    #[test]
    fn test_split_rows() {
        let rows = split_rows(&[1, 3], &[0.1, 0.7, 0.2], 1).unwrap();
        assert_eq!(rows, vec![vec![0.1, 0.7, 0.2]]);

        let rows = split_rows(&[3], &[0.1, 0.7, 0.2], 1).unwrap();
        assert_eq!(rows.len(), 1);

        let rows = split_rows(&[2, 2], &[0.4, 0.6, 0.9, 0.1], 2).unwrap();
        assert_eq!(rows, vec![vec![0.4, 0.6], vec![0.9, 0.1]]);

        assert!(split_rows(&[1, 2, 2], &[0.0; 4], 1).is_err());
        assert!(split_rows(&[1, 4], &[0.0; 3], 1).is_err());
    }
}
