//! Face Detection and Age/Gender Inference Library

pub mod config;
pub mod engine;
pub mod error;
pub mod service;
pub mod staging;
pub mod utils;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use service::{PredictionPipeline, PredictionWorker};
pub use staging::{AssetSource, AssetStager, DirAssetSource};
