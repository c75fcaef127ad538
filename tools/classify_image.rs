//! Classify Image
//!
//! Runs the inference pipeline on local leaf photos without starting the
//! web server. Useful for checking a freshly exported model against known
//! reference images.

use anyhow::{Context, Result};
use clap::Parser;
use plant_disease_detector::{
    config::AppConfig,
    models::{inference::InferencePipeline, loader::shared_classifier},
    types::upload::UploadedImage,
};
use std::path::PathBuf;
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "classify-image", version, about = "Classify leaf photos from the command line")]
struct Args {
    /// Image files (jpg, jpeg, png)
    #[arg(required = true)]
    images: Vec<PathBuf>,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the ONNX model, overrides the configuration
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// Print one JSON object per image
    #[arg(long)]
    json: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut config = AppConfig::load_from(args.config.as_deref())?;
    if let Some(model) = args.model {
        config.model.path = model;
    }

    let classifier = shared_classifier(&config.model)?;
    let pipeline = InferencePipeline::from_config(&config, classifier)?;

    let mut failures = 0;
    for path in &args.images {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let upload = UploadedImage::new(bytes).with_file_name(path.display().to_string());

        match pipeline.classify_upload(&upload).map(|(_, prediction)| prediction) {
            Ok(prediction) if args.json => {
                println!("{}", serde_json::to_string(&prediction)?);
            }
            Ok(prediction) => {
                println!("Image: {}", path.display());
                println!("Prediction: {} (class {})", prediction.label, prediction.class_index);
                println!("Confidence: {}", prediction.confidence_display());
                for (rank, score) in prediction.top_k.iter().enumerate() {
                    println!(
                        "  {}. {} (class {}) - {:.2}%",
                        rank + 1,
                        score.label,
                        score.class_index,
                        score.probability * 100.0
                    );
                }
                println!("Inference time: {:.2} ms\n", prediction.inference_time_ms);
            }
            Err(e) => {
                failures += 1;
                warn!(image = %path.display(), error = %e, "Classification failed");
                eprintln!("{}: {}", path.display(), e);
            }
        }
    }

    if failures > 0 {
        anyhow::bail!("{} of {} images failed", failures, args.images.len());
    }
    Ok(())
}
