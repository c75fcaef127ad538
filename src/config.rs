//! Configuration management for the plant disease detector

use anyhow::{bail, Context, Result};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::models::labels::DEFAULT_CLASS_NAMES;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Prefix for environment overrides (`PLANT_DETECTOR__SERVER__PORT=9000`)
pub const ENV_PREFIX: &str = "PLANT_DETECTOR";

/// Memory layout of the input tensor expected by the model
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TensorLayout {
    /// [batch, height, width, channels] - Keras/TensorFlow exports
    #[default]
    Nhwc,
    /// [batch, channels, height, width] - channel-first exports
    Nchw,
}

/// Post-processing applied to the raw model output
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OutputActivation {
    /// Model already emits probabilities
    #[default]
    None,
    /// Model emits logits, apply softmax before the argmax
    Softmax,
}

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub model: ModelConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Maximum accepted request body (upload) size in bytes
    pub body_limit_bytes: usize,
}

/// Classifier configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Path to the serialized ONNX model
    pub path: PathBuf,
    /// Number of intra-op threads for ONNX inference
    #[serde(default = "default_onnx_threads")]
    pub onnx_threads: usize,
    /// Square input edge in pixels
    pub input_size: u32,
    /// Input tensor layout
    #[serde(default)]
    pub layout: TensorLayout,
    /// Output post-processing
    #[serde(default)]
    pub activation: OutputActivation,
    /// Inline class label table, in model output order
    #[serde(default)]
    pub labels: Option<Vec<String>>,
    /// File with one class label per line; takes precedence over `labels`
    #[serde(default)]
    pub labels_path: Option<PathBuf>,
    /// Number of ranked classes reported with each prediction
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

fn default_onnx_threads() -> usize {
    1
}

fn default_top_k() -> usize {
    3
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

/// Metrics reporting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Seconds between logged summaries, 0 disables the reporter
    pub report_interval_secs: u64,
}

impl AppConfig {
    /// Load configuration from the default file (optional) and environment
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering defaults, a TOML file and environment overrides.
    ///
    /// An explicitly given file must exist; the default file is optional.
    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_PATH)).required(false),
        };

        let config = Config::builder()
            .add_source(
                Config::try_from(&AppConfig::default())
                    .context("Failed to serialize default configuration")?,
            )
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: AppConfig = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::load_from(Some(path.as_ref()))
    }

    /// Reject configurations the pipeline cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.model.input_size == 0 {
            bail!("model.input_size must be greater than zero");
        }
        if self.model.top_k == 0 {
            bail!("model.top_k must be at least 1");
        }
        if self.model.onnx_threads == 0 {
            bail!("model.onnx_threads must be at least 1");
        }
        if let Some(labels) = &self.model.labels {
            if labels.is_empty() {
                bail!("model.labels must not be empty");
            }
            let mut seen = HashSet::new();
            for label in labels {
                if !seen.insert(label.as_str()) {
                    bail!("model.labels contains duplicate entry {:?}", label);
                }
            }
        }
        Ok(())
    }

    /// Socket address string for the HTTP listener
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8501,
                body_limit_bytes: 10 * 1024 * 1024,
            },
            model: ModelConfig {
                path: PathBuf::from("outputs/final_model.onnx"),
                onnx_threads: default_onnx_threads(),
                input_size: 224,
                layout: TensorLayout::Nhwc,
                activation: OutputActivation::None,
                labels: Some(DEFAULT_CLASS_NAMES.iter().map(|s| s.to_string()).collect()),
                labels_path: None,
                top_k: default_top_k(),
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "pretty".to_string(),
            },
            metrics: MetricsConfig {
                report_interval_secs: 300,
            },
        }
    }
}
