//! Inference engine module
//!
//! Provides:
//! - Per-role model cache with lazy, at-most-once loading
//! - Image normalization and classifier blob building
//! - Decoding of detector rows and classifier probabilities
//! - YuNet raw head decoding
//! - An OpenVINO backend for the engine traits

pub mod cache;
pub mod classifier;
pub mod detector;
pub mod openvino_engine;
pub mod preprocess;
pub mod traits;
pub mod yunet;

#[cfg(test)]
pub(crate) mod test_support;

pub use cache::{LoadedModel, ModelCache, ModelHandle, ModelRole};
pub use classifier::{
    decode_classification, ClassificationResult, Classifier, AGE_LABELS, GENDER_LABELS,
};
pub use detector::{
    decode_faces, square_crop_region, CropRegion, FaceBox, FaceRecord, FaceRect, Point,
};
pub use openvino_engine::OpenVinoEngine;
pub use preprocess::{InferenceSize, NormalizedImage};
pub use traits::{ClassifierEngine, DetectorEngine};
