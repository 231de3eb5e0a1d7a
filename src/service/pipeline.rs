//! Prediction Pipeline
//!
//! Orchestrates model loading, preprocessing, inference and decoding.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use image::DynamicImage;
use ndarray::Array4;
use tracing::{debug, info};

use crate::engine::preprocess::{build_blob, channel_mean, prepare, InferenceSize};
use crate::engine::{
    decode_classification, decode_faces, ClassificationResult, Classifier, ClassifierEngine,
    DetectorEngine, FaceRecord, ModelCache, ModelRole,
};
use crate::error::{PipelineError, Result};

use super::types::*;

/// Face detection and age/gender classification over a shared model cache
pub struct PredictionPipeline<D: DetectorEngine, C: ClassifierEngine> {
    cache: Arc<ModelCache<D, C>>,
    classifier_input: InferenceSize,
}

impl<D: DetectorEngine, C: ClassifierEngine> PredictionPipeline<D, C> {
    /// Create a new pipeline
    pub fn new(cache: Arc<ModelCache<D, C>>, classifier_input: InferenceSize) -> Self {
        Self {
            cache,
            classifier_input,
        }
    }

    pub fn cache(&self) -> &Arc<ModelCache<D, C>> {
        &self.cache
    }

    /// Detect faces, optionally cropping a square around each one.
    pub fn detect_faces(&self, image: &DynamicImage, crop_faces: bool) -> Result<Vec<FaceRecord>> {
        let model = self.cache.detector()?;
        let input = self.cache.detector_input();
        let normalized = prepare(image, input);

        let start = Instant::now();
        let rows = self
            .cache
            .detector_engine()
            .run(&model, &normalized)
            .map_err(|source| PipelineError::Inference {
                role: ModelRole::Detector,
                source,
            })?;
        info!("detect_faces: cost {:?}", start.elapsed());

        let faces = decode_faces(rows.view(), image, input, crop_faces)?;
        info!("Detected {} faces", faces.len());
        Ok(faces)
    }

    /// Predict age bracket and gender for the whole image.
    ///
    /// The image is normalized once; both classifiers read the same blob.
    pub fn classify_age_and_gender(&self, image: &DynamicImage) -> Result<AgeGender> {
        let normalized = prepare(image, self.classifier_input);
        let blob = build_blob(&normalized, channel_mean(&normalized));

        let age = self.classify(Classifier::Age, &blob)?;
        let gender = self.classify(Classifier::Gender, &blob)?;
        info!("age: {}, gender: {}", age.label, gender.label);

        Ok(AgeGender { age, gender })
    }

    /// Detect faces and classify each face crop.
    ///
    /// Faces whose crop region falls outside the image are skipped.
    pub fn analyze_faces(&self, image: &DynamicImage) -> Result<Vec<FaceAnalysis>> {
        let faces = self.detect_faces(image, true)?;
        let mut analyses = Vec::with_capacity(faces.len());

        for face in &faces {
            let Some(crop) = face.crop.as_ref() else {
                debug!("Skipping face without crop: {:?}", face.bbox);
                continue;
            };
            let prediction = self.classify_age_and_gender(crop)?;
            analyses.push(FaceAnalysis {
                face: face.into(),
                age: prediction.age.label,
                gender: prediction.gender.label,
            });
        }

        Ok(analyses)
    }

    /// Execute one request synchronously.
    pub fn run(&self, request: &Request) -> Result<Response> {
        match request {
            Request::DetectFaces { image, crop_faces } => {
                self.detect_faces(image, *crop_faces).map(Response::Faces)
            }
            Request::ClassifyAgeAndGender { image } => {
                self.classify_age_and_gender(image).map(Response::AgeGender)
            }
            Request::AnalyzeFaces { image } => self.analyze_faces(image).map(Response::Analysis),
        }
    }

    /// Get model load status
    pub fn status(&self) -> StatusResult {
        let models_loaded: HashMap<String, bool> = self
            .cache
            .status()
            .into_iter()
            .map(|(role, loaded)| (role.as_str().to_string(), loaded))
            .collect();

        StatusResult {
            version: env!("CARGO_PKG_VERSION").to_string(),
            models_loaded,
        }
    }

    fn classify(&self, classifier: Classifier, blob: &Array4<f32>) -> Result<ClassificationResult> {
        let model = self.cache.classifier(classifier)?;
        let probabilities = self
            .cache
            .classifier_engine()
            .run(&model, blob)
            .map_err(|source| PipelineError::Inference {
                role: classifier.role(),
                source,
            })?;
        decode_classification(&probabilities, classifier.labels())
    }
}

// Async entry points run the blocking work on tokio's blocking pool.
impl<D: DetectorEngine, C: ClassifierEngine> PredictionPipeline<D, C> {
    pub async fn detect_faces_async(
        self: Arc<Self>,
        image: Arc<DynamicImage>,
        crop_faces: bool,
    ) -> Result<DetectionResult> {
        let start = Instant::now();
        let faces =
            tokio::task::spawn_blocking(move || self.detect_faces(&image, crop_faces)).await??;

        Ok(DetectionResult {
            faces: faces.iter().map(DetectedFace::from).collect(),
            inference_time_ms: start.elapsed().as_millis() as u64,
        })
    }

    pub async fn classify_age_and_gender_async(
        self: Arc<Self>,
        image: Arc<DynamicImage>,
    ) -> Result<AgeGender> {
        tokio::task::spawn_blocking(move || self.classify_age_and_gender(&image)).await?
    }

    pub async fn analyze_faces_async(
        self: Arc<Self>,
        image: Arc<DynamicImage>,
    ) -> Result<Vec<FaceAnalysis>> {
        tokio::task::spawn_blocking(move || self.analyze_faces(&image)).await?
    }
}
