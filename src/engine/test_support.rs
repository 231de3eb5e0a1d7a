//! Mock engines and cache fixtures for unit tests.

use std::collections::HashMap;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use ndarray::{Array2, Array4};
use parking_lot::Mutex;
use tempfile::TempDir;

use super::cache::ModelCache;
use super::preprocess::{InferenceSize, NormalizedImage, DETECTOR_INPUT_SIZE};
use super::traits::{ClassifierEngine, DetectorEngine};
use crate::config::ModelsConfig;
use crate::staging::{AssetSource, AssetStager};

#[derive(Debug)]
pub struct MockModel {
    pub config: Option<PathBuf>,
    pub weights: PathBuf,
}

pub struct MockDetector {
    pub constructed: AtomicUsize,
    pub attempts: AtomicUsize,
    pub runs: AtomicUsize,
    pub seen_sizes: Mutex<Vec<InferenceSize>>,
    rows: Array2<f32>,
    fail_first: usize,
    fail_runs: usize,
    delay: Duration,
}

impl MockDetector {
    pub fn with_rows(rows: Array2<f32>) -> Self {
        Self {
            constructed: AtomicUsize::new(0),
            attempts: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            seen_sizes: Mutex::new(Vec::new()),
            rows,
            fail_first: 0,
            fail_runs: 0,
            delay: Duration::ZERO,
        }
    }

    pub fn empty() -> Self {
        Self::with_rows(Array2::zeros((0, 15)))
    }

    pub fn failing_first(failures: usize) -> Self {
        Self {
            fail_first: failures,
            ..Self::empty()
        }
    }

    pub fn failing_runs(failures: usize) -> Self {
        Self {
            fail_runs: failures,
            ..Self::empty()
        }
    }

    pub fn slow(millis: u64) -> Self {
        Self {
            delay: Duration::from_millis(millis),
            ..Self::empty()
        }
    }
}

impl DetectorEngine for MockDetector {
    type Model = MockModel;

    fn construct(
        &self,
        weights: &Path,
        config: Option<&Path>,
        _input_size: InferenceSize,
    ) -> Result<MockModel> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        if attempt < self.fail_first {
            bail!("corrupt weights: {}", weights.display());
        }
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(MockModel {
            config: config.map(Path::to_path_buf),
            weights: weights.to_path_buf(),
        })
    }

    fn run(&self, _model: &MockModel, image: &NormalizedImage) -> Result<Array2<f32>> {
        if self.runs.fetch_add(1, Ordering::SeqCst) < self.fail_runs {
            bail!("malformed input tensor");
        }
        self.seen_sizes.lock().push(image.size());
        Ok(self.rows.clone())
    }
}

/// Answers with `age` for models staged from an `age*` file, `gender` otherwise.
pub struct MockClassifier {
    pub constructed: AtomicUsize,
    pub runs: AtomicUsize,
    pub blob_shapes: Mutex<Vec<Vec<usize>>>,
    age: Vec<f32>,
    gender: Vec<f32>,
}

impl MockClassifier {
    pub fn new(age: Vec<f32>, gender: Vec<f32>) -> Self {
        Self {
            constructed: AtomicUsize::new(0),
            runs: AtomicUsize::new(0),
            blob_shapes: Mutex::new(Vec::new()),
            age,
            gender,
        }
    }

    pub fn uniform() -> Self {
        Self::new(vec![0.125; 8], vec![0.5; 2])
    }
}

impl ClassifierEngine for MockClassifier {
    type Model = MockModel;

    fn construct(&self, config: &Path, weights: &Path) -> Result<MockModel> {
        self.constructed.fetch_add(1, Ordering::SeqCst);
        Ok(MockModel {
            config: Some(config.to_path_buf()),
            weights: weights.to_path_buf(),
        })
    }

    fn run(&self, model: &MockModel, blob: &Array4<f32>) -> Result<Vec<f32>> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        self.blob_shapes.lock().push(blob.shape().to_vec());

        let is_age = model
            .config
            .as_deref()
            .and_then(Path::file_name)
            .is_some_and(|name| name.to_string_lossy().starts_with("age"));
        Ok(if is_age { self.age.clone() } else { self.gender.clone() })
    }
}

/// In-memory bundle holding every default model file.
struct MemorySource {
    files: HashMap<String, Vec<u8>>,
    opens: Arc<AtomicUsize>,
}

impl AssetSource for MemorySource {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.files
            .get(path)
            .map(|bytes| Box::new(io::Cursor::new(bytes.clone())) as Box<dyn Read + Send>)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.to_string()))
    }
}

pub struct Fixture<D: DetectorEngine, C: ClassifierEngine> {
    pub cache: Arc<ModelCache<D, C>>,
    opens: Arc<AtomicUsize>,
    _cache_dir: TempDir,
}

impl<D: DetectorEngine, C: ClassifierEngine> Fixture<D, C> {
    /// Number of times the bundle was read.
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

pub fn fixture_cache<D: DetectorEngine, C: ClassifierEngine>(
    detector: D,
    classifier: C,
) -> Fixture<D, C> {
    let models = ModelsConfig::default();
    let mut names = vec![
        models.detector.weights.clone(),
        models.age.config.clone(),
        models.age.weights.clone(),
        models.gender.config.clone(),
        models.gender.weights.clone(),
    ];
    names.extend(models.detector.config.clone());

    let files = names
        .into_iter()
        .map(|name| (format!("opencv/{name}"), name.into_bytes()))
        .collect();
    let opens = Arc::new(AtomicUsize::new(0));
    let source = MemorySource {
        files,
        opens: opens.clone(),
    };

    let cache_dir = tempfile::tempdir().unwrap();
    let stager = AssetStager::new(Box::new(source), "opencv", cache_dir.path(), "opencv");

    Fixture {
        cache: Arc::new(ModelCache::new(
            stager,
            models,
            DETECTOR_INPUT_SIZE,
            Arc::new(detector),
            Arc::new(classifier),
        )),
        opens,
        _cache_dir: cache_dir,
    }
}
