//! Model Cache
//!
//! Holds at most one lazily constructed model per role. The first request for
//! a role stages its files and builds the model; every later request gets the
//! same handle back.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tracing::{debug, info};

use super::classifier::Classifier;
use super::preprocess::InferenceSize;
use super::traits::{ClassifierEngine, DetectorEngine};
use crate::config::{ClassifierModelConfig, ModelsConfig};
use crate::error::{PipelineError, Result};
use crate::staging::AssetStager;

/// Model roles that can be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Detector,
    AgeClassifier,
    GenderClassifier,
}

impl ModelRole {
    pub const ALL: [ModelRole; 3] = [
        ModelRole::Detector,
        ModelRole::AgeClassifier,
        ModelRole::GenderClassifier,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelRole::Detector => "detector",
            ModelRole::AgeClassifier => "age",
            ModelRole::GenderClassifier => "gender",
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to a loaded model, tagged with its role.
pub struct ModelHandle<M> {
    role: ModelRole,
    model: Arc<M>,
}

impl<M> ModelHandle<M> {
    pub fn role(&self) -> ModelRole {
        self.role
    }

    /// True when both handles refer to the same loaded model.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.model, &other.model)
    }
}

impl<M> Clone for ModelHandle<M> {
    fn clone(&self) -> Self {
        Self {
            role: self.role,
            model: Arc::clone(&self.model),
        }
    }
}

impl<M> Deref for ModelHandle<M> {
    type Target = M;
    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl<M> fmt::Debug for ModelHandle<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelHandle")
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

/// Result of [`ModelCache::get`]
pub enum LoadedModel<D, C> {
    Detector(ModelHandle<D>),
    Classifier(ModelHandle<C>),
}

impl<D, C> LoadedModel<D, C> {
    pub fn role(&self) -> ModelRole {
        match self {
            LoadedModel::Detector(handle) => handle.role(),
            LoadedModel::Classifier(handle) => handle.role(),
        }
    }
}

type Slot<M> = RwLock<Option<ModelHandle<M>>>;

/// Per-role model cache with lazy loading
pub struct ModelCache<D: DetectorEngine, C: ClassifierEngine> {
    stager: AssetStager,
    models: ModelsConfig,
    detector_input: InferenceSize,

    detector_engine: Arc<D>,
    classifier_engine: Arc<C>,

    detector: Slot<D::Model>,
    age: Slot<C::Model>,
    gender: Slot<C::Model>,
}

impl<D: DetectorEngine, C: ClassifierEngine> ModelCache<D, C> {
    /// Create an empty cache. Nothing is staged or loaded until first use.
    pub fn new(
        stager: AssetStager,
        models: ModelsConfig,
        detector_input: InferenceSize,
        detector_engine: Arc<D>,
        classifier_engine: Arc<C>,
    ) -> Self {
        Self {
            stager,
            models,
            detector_input,
            detector_engine,
            classifier_engine,
            detector: RwLock::new(None),
            age: RwLock::new(None),
            gender: RwLock::new(None),
        }
    }

    pub fn detector_engine(&self) -> &D {
        &self.detector_engine
    }

    pub fn classifier_engine(&self) -> &C {
        &self.classifier_engine
    }

    /// Inference size the detector was constructed for.
    pub fn detector_input(&self) -> InferenceSize {
        self.detector_input
    }

    /// Get or load the model for `role`.
    pub fn get(&self, role: ModelRole) -> Result<LoadedModel<D::Model, C::Model>> {
        match role {
            ModelRole::Detector => self.detector().map(LoadedModel::Detector),
            ModelRole::AgeClassifier => {
                self.classifier(Classifier::Age).map(LoadedModel::Classifier)
            }
            ModelRole::GenderClassifier => {
                self.classifier(Classifier::Gender).map(LoadedModel::Classifier)
            }
        }
    }

    /// Get or load the face detector.
    pub fn detector(&self) -> Result<ModelHandle<D::Model>> {
        let role = ModelRole::Detector;
        load_once(&self.detector, role, || {
            let files = &self.models.detector;
            let weights = self.stager.stage(&files.weights)?;
            let config = files
                .config
                .as_deref()
                .map(|name| self.stager.stage(name))
                .transpose()?;

            self.detector_engine
                .construct(&weights, config.as_deref(), self.detector_input)
                .map_err(|source| PipelineError::ModelConstruction { role, source })
        })
    }

    /// Get or load one of the classifiers.
    pub fn classifier(&self, classifier: Classifier) -> Result<ModelHandle<C::Model>> {
        let role = classifier.role();
        let (slot, files): (&Slot<C::Model>, &ClassifierModelConfig) = match classifier {
            Classifier::Age => (&self.age, &self.models.age),
            Classifier::Gender => (&self.gender, &self.models.gender),
        };

        load_once(slot, role, || {
            let weights = self.stager.stage(&files.weights)?;
            let config = self.stager.stage(&files.config)?;

            self.classifier_engine
                .construct(&config, &weights)
                .map_err(|source| PipelineError::ModelConstruction { role, source })
        })
    }

    /// Check if a model is loaded
    pub fn is_loaded(&self, role: ModelRole) -> bool {
        match role {
            ModelRole::Detector => self.detector.read().is_some(),
            ModelRole::AgeClassifier => self.age.read().is_some(),
            ModelRole::GenderClassifier => self.gender.read().is_some(),
        }
    }

    /// Get status of all models
    pub fn status(&self) -> Vec<(ModelRole, bool)> {
        ModelRole::ALL
            .iter()
            .map(|&role| (role, self.is_loaded(role)))
            .collect()
    }
}

/// Return the slot's handle, loading it first if empty.
///
/// The write lock is held for the whole load, so concurrent first calls for
/// one role wait for a single construction. A failed load leaves the slot
/// empty.
fn load_once<M>(
    slot: &Slot<M>,
    role: ModelRole,
    load: impl FnOnce() -> Result<M>,
) -> Result<ModelHandle<M>> {
    if let Some(handle) = slot.read().as_ref() {
        return Ok(handle.clone());
    }

    let mut write_guard = slot.write();

    // Double-check after acquiring write lock
    if let Some(handle) = write_guard.as_ref() {
        debug!("Model {} was loaded while waiting", role);
        return Ok(handle.clone());
    }

    info!("Loading model: {}", role);
    let start = Instant::now();

    let handle = ModelHandle {
        role,
        model: Arc::new(load()?),
    };

    info!("Model {} loaded in {:?}", role, start.elapsed());
    *write_guard = Some(handle.clone());

    Ok(handle)
}
