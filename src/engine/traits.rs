//! Inference engine capabilities
//!
//! The crate never runs a network itself. Detector and classifier engines are
//! plugged in through these traits; `OpenVinoEngine` is the bundled backend.

use std::path::Path;

use anyhow::Result;
use ndarray::{Array2, Array4};

use super::preprocess::{InferenceSize, NormalizedImage};

/// Face detector backend.
pub trait DetectorEngine: Send + Sync + 'static {
    /// Loaded detector handle.
    type Model: Send + Sync + 'static;

    /// Load a detector from `weights` (and `config` if the format needs one)
    /// for images of `input_size`.
    fn construct(
        &self,
        weights: &Path,
        config: Option<&Path>,
        input_size: InferenceSize,
    ) -> Result<Self::Model>;

    /// Run the detector. Returns one 15-column row per face, in inference space.
    fn run(&self, model: &Self::Model, image: &NormalizedImage) -> Result<Array2<f32>>;
}

/// Image classifier backend.
pub trait ClassifierEngine: Send + Sync + 'static {
    /// Loaded classifier handle.
    type Model: Send + Sync + 'static;

    /// Load a classifier from its architecture file and weights.
    fn construct(&self, config: &Path, weights: &Path) -> Result<Self::Model>;

    /// Run the classifier on an NCHW blob. Returns per-class probabilities.
    fn run(&self, model: &Self::Model, blob: &Array4<f32>) -> Result<Vec<f32>>;
}
