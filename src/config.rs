//! Face inference configuration

use anyhow::Context;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::engine::preprocess::{InferenceSize, CLASSIFIER_INPUT_SIZE, DETECTOR_INPUT_SIZE};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    pub staging: StagingConfig,
    pub models: ModelsConfig,
    pub inference: InferenceConfig,
}

/// Where model files come from and where they are staged
#[derive(Debug, Clone, Deserialize)]
pub struct StagingConfig {
    /// Root of the read-only asset bundle
    pub asset_root: PathBuf,
    /// Directory inside the bundle holding the model files
    pub bundle_dir: String,
    /// Writable cache root
    pub cache_root: PathBuf,
    /// Subdirectory of the cache root staged files land in
    pub cache_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelsConfig {
    pub detector: DetectorModelConfig,
    pub age: ClassifierModelConfig,
    pub gender: ClassifierModelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DetectorModelConfig {
    pub weights: String,
    pub config: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierModelConfig {
    /// Architecture file
    pub config: String,
    pub weights: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InferenceConfig {
    pub device: String,
    pub detector_input: InferenceSize,
    pub classifier_input: InferenceSize,
    pub score_threshold: f32,
    pub nms_threshold: f32,
    pub top_k: usize,
}

impl Config {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {path}"))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("failed to parse config {path}"))?;
        config.validate().with_context(|| format!("invalid config {path}"))?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise fall back to the defaults.
    ///
    /// A file that exists but fails to parse or validate is an error.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if !Path::new(path).exists() {
            info!("No config at {}, using defaults", path);
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn default_path() -> &'static str {
        "config.toml"
    }

    /// Reject settings that would make decoding meaningless.
    pub fn validate(&self) -> anyhow::Result<()> {
        for (name, size) in [
            ("detector_input", self.inference.detector_input),
            ("classifier_input", self.inference.classifier_input),
        ] {
            anyhow::ensure!(
                size.width > 0 && size.height > 0,
                "inference.{name} must be non-zero (got {}x{})",
                size.width,
                size.height
            );
        }
        anyhow::ensure!(
            (0.0..=1.0).contains(&self.inference.score_threshold),
            "inference.score_threshold must be within [0, 1]"
        );
        Ok(())
    }
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            asset_root: PathBuf::from("assets"),
            bundle_dir: "opencv".to_string(),
            cache_root: PathBuf::from("cache"),
            cache_dir: "opencv".to_string(),
        }
    }
}

impl Default for ModelsConfig {
    fn default() -> Self {
        Self {
            detector: DetectorModelConfig {
                weights: "face_detection_yunet_2023mar.onnx".to_string(),
                config: None,
            },
            age: ClassifierModelConfig {
                config: "age_net.xml".to_string(),
                weights: "age_net.bin".to_string(),
            },
            gender: ClassifierModelConfig {
                config: "gender_net.xml".to_string(),
                weights: "gender_net.bin".to_string(),
            },
        }
    }
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            device: "CPU".to_string(),
            detector_input: DETECTOR_INPUT_SIZE,
            classifier_input: CLASSIFIER_INPUT_SIZE,
            score_threshold: 0.9,
            nms_threshold: 0.3,
            top_k: 5000,
        }
    }
}
