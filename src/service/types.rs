//! Service layer types

use std::collections::HashMap;
use std::sync::Arc;

use image::DynamicImage;
use serde::Serialize;

use crate::engine::{ClassificationResult, FaceRecord};

/// Combined age and gender prediction
#[derive(Debug, Clone, Serialize)]
pub struct AgeGender {
    pub age: ClassificationResult,
    pub gender: ClassificationResult,
}

/// Serializable view of a [`FaceRecord`], without the crop
#[derive(Debug, Clone, Serialize)]
pub struct DetectedFace {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Left eye, right eye, nose, mouth left, mouth right
    pub landmarks: Vec<(f32, f32)>,
}

impl From<&FaceRecord> for DetectedFace {
    fn from(face: &FaceRecord) -> Self {
        let landmarks = [
            face.left_eye,
            face.right_eye,
            face.nose,
            face.mouth_left,
            face.mouth_right,
        ]
        .iter()
        .map(|p| (p.x, p.y))
        .collect();

        Self {
            x1: face.bbox.left,
            y1: face.bbox.top,
            x2: face.bbox.right,
            y2: face.bbox.bottom,
            confidence: face.score,
            landmarks,
        }
    }
}

/// Face detection result
#[derive(Debug, Clone, Serialize)]
pub struct DetectionResult {
    pub faces: Vec<DetectedFace>,
    pub inference_time_ms: u64,
}

/// Age and gender of one detected face
#[derive(Debug, Clone, Serialize)]
pub struct FaceAnalysis {
    #[serde(flatten)]
    pub face: DetectedFace,
    pub age: String,
    pub gender: String,
}

/// Model load status
#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub version: String,
    pub models_loaded: HashMap<String, bool>,
}

/// One unit of work for the pipeline
#[derive(Debug, Clone)]
pub enum Request {
    DetectFaces {
        image: Arc<DynamicImage>,
        crop_faces: bool,
    },
    ClassifyAgeAndGender {
        image: Arc<DynamicImage>,
    },
    AnalyzeFaces {
        image: Arc<DynamicImage>,
    },
}

/// Output of a [`Request`]
#[derive(Debug)]
pub enum Response {
    Faces(Vec<FaceRecord>),
    AgeGender(AgeGender),
    Analysis(Vec<FaceAnalysis>),
}
