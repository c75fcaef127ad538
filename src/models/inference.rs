//! Inference pipeline: upload bytes in, labelled prediction out

use anyhow::Result;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use crate::config::{AppConfig, OutputActivation};
use crate::error::InferenceError;
use crate::models::labels::ClassLabelTable;
use crate::models::loader::Classifier;
use crate::preprocess::ImagePreprocessor;
use crate::types::prediction::{ClassScore, Prediction};
use crate::types::upload::{ImageKind, UploadedImage};

/// Slack allowed on probabilities produced by float softmax layers
const PROBABILITY_TOLERANCE: f32 = 1e-4;

/// Single-image classification pipeline
pub struct InferencePipeline {
    /// Cached classifier shared by all requests
    classifier: Arc<dyn Classifier>,
    /// Image to tensor conversion
    preprocessor: ImagePreprocessor,
    /// Output position to label mapping
    labels: ClassLabelTable,
    /// Post-processing applied before argmax
    activation: OutputActivation,
    /// Number of ranked classes attached to each prediction
    top_k: usize,
}

impl InferencePipeline {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        preprocessor: ImagePreprocessor,
        labels: ClassLabelTable,
    ) -> Self {
        Self {
            classifier,
            preprocessor,
            labels,
            activation: OutputActivation::None,
            top_k: 3,
        }
    }

    /// Build the pipeline described by the configuration around a loaded classifier
    pub fn from_config(config: &AppConfig, classifier: Arc<dyn Classifier>) -> Result<Self> {
        let labels = ClassLabelTable::from_config(&config.model)?;
        Ok(
            Self::new(classifier, ImagePreprocessor::from_config(&config.model), labels)
                .with_activation(config.model.activation)
                .with_top_k(config.model.top_k),
        )
    }

    pub fn with_activation(mut self, activation: OutputActivation) -> Self {
        self.activation = activation;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn labels(&self) -> &ClassLabelTable {
        &self.labels
    }

    pub fn preprocessor(&self) -> &ImagePreprocessor {
        &self.preprocessor
    }

    pub fn model_name(&self) -> &str {
        self.classifier.name()
    }

    /// Decode, preprocess and classify raw JPEG/PNG bytes
    pub fn classify(&self, bytes: &[u8]) -> Result<Prediction, InferenceError> {
        let image = self.preprocessor.decode(bytes)?;
        self.classify_image(&image)
    }

    /// Check an upload is JPEG/PNG, decode it as that kind and classify it
    pub fn classify_upload(
        &self,
        upload: &UploadedImage,
    ) -> Result<(ImageKind, Prediction), InferenceError> {
        let kind = upload.kind()?;
        let image = self.preprocessor.decode_as(&upload.bytes, kind)?;
        Ok((kind, self.classify_image(&image)?))
    }

    /// Classify an already decoded image
    pub fn classify_image(&self, image: &DynamicImage) -> Result<Prediction, InferenceError> {
        let start = Instant::now();

        let batch = self.preprocessor.process(image);
        let outputs = self.classifier.predict(&batch)?;

        let probabilities = match <[Vec<f32>; 1]>::try_from(outputs) {
            Ok([probabilities]) => probabilities,
            Err(outputs) => {
                return Err(InferenceError::InvalidOutput(format!(
                    "expected 1 probability vector, got {}",
                    outputs.len()
                )))
            }
        };

        let prediction = self
            .interpret(probabilities)?
            .with_inference_time_ms(start.elapsed().as_secs_f64() * 1000.0);

        debug!(
            model = %self.classifier.name(),
            label = %prediction.label,
            class_index = prediction.class_index,
            confidence = prediction.confidence,
            "Image classified"
        );

        Ok(prediction)
    }

    /// Map one probability vector to the winning label and confidence
    pub fn interpret(&self, raw: Vec<f32>) -> Result<Prediction, InferenceError> {
        self.labels.check_outputs(raw.len())?;

        let probabilities = match self.activation {
            OutputActivation::None => raw,
            OutputActivation::Softmax => softmax(&raw),
        };
        validate_probabilities(&probabilities)?;

        let ranked = rank(&probabilities, self.top_k);
        let (best_index, best_probability) = argmax(&probabilities)
            .ok_or_else(|| InferenceError::InvalidOutput("empty probability vector".to_string()))?;

        let best = self.score(best_index, best_probability)?;
        let top_k = ranked
            .into_iter()
            .map(|(index, probability)| self.score(index, probability))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Prediction::new(&best, self.classifier.name()).with_top_k(top_k))
    }

    fn score(&self, class_index: usize, probability: f32) -> Result<ClassScore, InferenceError> {
        let label = self.labels.get(class_index).ok_or(InferenceError::LabelTableMismatch {
            outputs: class_index + 1,
            labels: self.labels.len(),
        })?;

        Ok(ClassScore {
            class_index,
            label: label.to_string(),
            probability,
        })
    }
}

/// Index and value of the largest entry; the first one wins on ties
pub fn argmax(values: &[f32]) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((i, v)),
        }
    }
    best
}

/// Numerically stable softmax
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Indices of the `k` highest probabilities, best first, ties by index
fn rank(probabilities: &[f32], k: usize) -> Vec<(usize, f32)> {
    let mut indexed: Vec<(usize, f32)> = probabilities.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    indexed.truncate(k);
    indexed
}

fn validate_probabilities(probabilities: &[f32]) -> Result<(), InferenceError> {
    if let Some((i, p)) = probabilities.iter().enumerate().find(|(_, p)| {
        !p.is_finite() || **p < -PROBABILITY_TOLERANCE || **p > 1.0 + PROBABILITY_TOLERANCE
    }) {
        return Err(InferenceError::InvalidOutput(format!(
            "class {i} has probability {p}, expected a value in [0, 1]"
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::preprocess::tests::{encode, leaf_image};
    use crate::preprocess::ImageBatch;
    use image::ImageFormat;
    use std::sync::Mutex;

    /// Classifier returning a fixed vector and recording the batch shapes it saw
    pub(crate) struct FixedClassifier {
        pub(crate) output: Vec<f32>,
        pub(crate) seen_shapes: Mutex<Vec<[usize; 4]>>,
    }

    impl FixedClassifier {
        pub(crate) fn new(output: Vec<f32>) -> Self {
            Self {
                output,
                seen_shapes: Mutex::new(Vec::new()),
            }
        }
    }

    impl Classifier for FixedClassifier {
        fn name(&self) -> &str {
            "fixed"
        }

        fn predict(&self, batch: &ImageBatch) -> Result<Vec<Vec<f32>>, InferenceError> {
            self.seen_shapes.lock().unwrap().push(batch.shape());
            Ok(vec![self.output.clone(); batch.batch_size()])
        }
    }

    /// Reference output: "Tomato Healthy" at 92.3%
    pub(crate) fn tomato_healthy_output() -> Vec<f32> {
        vec![0.01, 0.005, 0.005, 0.01, 0.01, 0.01, 0.005, 0.01, 0.003, 0.923]
    }

    fn pipeline(output: Vec<f32>) -> InferencePipeline {
        InferencePipeline::new(
            Arc::new(FixedClassifier::new(output)),
            ImagePreprocessor::default(),
            ClassLabelTable::default(),
        )
    }

    #[test]
    fn test_reference_image_scenario() {
        let classifier = Arc::new(FixedClassifier::new(tomato_healthy_output()));
        let pipeline = InferencePipeline::new(
            classifier.clone(),
            ImagePreprocessor::default(),
            ClassLabelTable::default(),
        );
        let bytes = encode(&leaf_image(512, 384), ImageFormat::Jpeg);

        let prediction = pipeline.classify(&bytes).unwrap();

        assert_eq!(prediction.label, "Tomato Healthy");
        assert_eq!(prediction.class_index, 9);
        assert!((prediction.confidence - 92.3).abs() < 0.01);
        assert_eq!(prediction.confidence_display(), "92.30%");
        assert_eq!(
            classifier.seen_shapes.lock().unwrap().as_slice(),
            &[[1, 224, 224, 3]]
        );
    }

    #[test]
    fn test_confidence_is_hundred_times_max() {
        let output = vec![0.1, 0.05, 0.6, 0.05, 0.05, 0.05, 0.02, 0.03, 0.03, 0.02];
        let prediction = pipeline(output.clone()).interpret(output).unwrap();

        assert_eq!(prediction.class_index, 2);
        assert_eq!(prediction.label, "Apple Cedar Rust");
        assert!((prediction.confidence - 60.0).abs() < 1e-4);
        assert!((0.0..=100.0).contains(&prediction.confidence));
    }

    #[test]
    fn test_top_k_carries_explicit_indices() {
        let prediction = pipeline(tomato_healthy_output())
            .with_top_k(3)
            .interpret(tomato_healthy_output())
            .unwrap();

        let indices: Vec<usize> = prediction.top_k.iter().map(|s| s.class_index).collect();
        assert_eq!(indices, vec![9, 0, 3]);
        assert_eq!(prediction.top_k[0].label, "Tomato Healthy");
    }

    #[test]
    fn test_idempotent_on_same_image() {
        let pipeline = pipeline(tomato_healthy_output());
        let bytes = encode(&leaf_image(100, 80), ImageFormat::Png);

        let first = pipeline.classify(&bytes).unwrap();
        let second = pipeline.classify(&bytes).unwrap();

        assert_eq!(first.label, second.label);
        assert_eq!(first.confidence, second.confidence);
    }

    #[test]
    fn test_tiny_image_is_classified() {
        let pipeline = pipeline(tomato_healthy_output());
        let bytes = encode(&leaf_image(10, 10), ImageFormat::Png);

        assert!(pipeline.classify(&bytes).is_ok());
    }

    #[test]
    fn test_label_table_mismatch_is_reported() {
        let pipeline = pipeline(vec![0.5, 0.5]);
        let bytes = encode(&leaf_image(32, 32), ImageFormat::Png);

        assert!(matches!(
            pipeline.classify(&bytes),
            Err(InferenceError::LabelTableMismatch {
                outputs: 2,
                labels: 10
            })
        ));
    }

    #[test]
    fn test_upload_is_decoded_as_its_kind() {
        let pipeline = pipeline(tomato_healthy_output());
        let upload = UploadedImage::new(encode(&leaf_image(32, 32), ImageFormat::Jpeg))
            .with_file_name("leaf.png");

        let (kind, prediction) = pipeline.classify_upload(&upload).unwrap();
        assert_eq!(kind, ImageKind::Jpeg);
        assert_eq!(prediction.class_index, 9);

        let gif = UploadedImage::new(b"GIF89a\x01\x00\x01\x00\x80\x00\x00".to_vec())
            .with_file_name("leaf.png");
        assert!(matches!(
            pipeline.classify_upload(&gif),
            Err(InferenceError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_corrupt_image_is_reported() {
        let pipeline = pipeline(tomato_healthy_output());
        assert!(matches!(
            pipeline.classify(b"not an image at all"),
            Err(InferenceError::DecodeImage(_))
        ));
    }

    #[test]
    fn test_out_of_range_probabilities_are_rejected() {
        let mut logits = vec![0.0; 10];
        logits[4] = 7.5;

        let err = pipeline(logits.clone()).interpret(logits.clone()).unwrap_err();
        assert!(matches!(err, InferenceError::InvalidOutput(_)));

        let prediction = pipeline(logits.clone())
            .with_activation(OutputActivation::Softmax)
            .interpret(logits)
            .unwrap();
        assert_eq!(prediction.class_index, 4);
        assert!(prediction.confidence > 99.0);
    }

    #[test]
    fn test_argmax_first_wins_on_ties() {
        assert_eq!(argmax(&[0.2, 0.4, 0.4]), Some((1, 0.4)));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(probs[2] > probs[1] && probs[1] > probs[0]);
    }
}
