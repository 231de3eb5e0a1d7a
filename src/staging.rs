//! Asset staging
//!
//! Model files ship inside a read-only bundle. Native loaders want a real
//! path, so each file is copied once into a cache directory and reused from
//! there on every later request.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{PipelineError, Result};

/// Read-only bundle of model files.
pub trait AssetSource: Send + Sync {
    /// Open a bundled file by its path inside the bundle.
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send + '_>>;
}

/// Asset bundle backed by a plain directory.
#[derive(Debug, Clone)]
pub struct DirAssetSource {
    root: PathBuf,
}

impl DirAssetSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl AssetSource for DirAssetSource {
    fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
        let file = File::open(self.root.join(path))?;
        Ok(Box::new(file))
    }
}

/// A model file as declared by configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelAsset {
    /// Logical file name, e.g. `age_net.bin`.
    pub name: String,
    /// Location inside the bundle.
    pub bundle_path: String,
    /// Destination inside the writable cache.
    pub destination: PathBuf,
}

/// Copies bundled files into a cache directory, at most once per file.
pub struct AssetStager {
    source: Box<dyn AssetSource>,
    bundle_dir: String,
    cache_dir: PathBuf,
    // One lock per destination so unrelated files stage in parallel.
    in_flight: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl AssetStager {
    /// Create a stager reading from `bundle_dir` inside `source` and writing to
    /// `cache_root/cache_subdir`.
    pub fn new(
        source: Box<dyn AssetSource>,
        bundle_dir: impl Into<String>,
        cache_root: impl AsRef<Path>,
        cache_subdir: impl AsRef<Path>,
    ) -> Self {
        Self {
            source,
            bundle_dir: bundle_dir.into(),
            cache_dir: cache_root.as_ref().join(cache_subdir),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Directory staged files land in.
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Describe where `name` comes from and where it will be staged.
    pub fn asset(&self, name: &str) -> Result<ModelAsset> {
        validate_name(name)?;
        let bundle_path = if self.bundle_dir.is_empty() {
            name.to_string()
        } else {
            format!("{}/{}", self.bundle_dir.trim_end_matches('/'), name)
        };
        Ok(ModelAsset {
            name: name.to_string(),
            bundle_path,
            destination: self.cache_dir.join(name),
        })
    }

    /// Return an absolute path to a staged copy of `name`, copying it out of
    /// the bundle if it is not already present.
    ///
    /// An existing destination file is reused verbatim.
    pub fn stage(&self, name: &str) -> Result<PathBuf> {
        let asset = self.asset(name)?;
        let staging_err = |source: io::Error| PipelineError::Staging {
            name: name.to_string(),
            source,
        };

        fs::create_dir_all(&self.cache_dir).map_err(staging_err)?;

        let lock = self.lock_for(&asset.destination);
        let _guard = lock.lock();

        if !asset.destination.exists() {
            info!("Staging {} -> {:?}", asset.bundle_path, asset.destination);
            self.copy_into_place(&asset).map_err(staging_err)?;
        } else {
            debug!("Reusing staged asset {:?}", asset.destination);
        }

        fs::canonicalize(&asset.destination).map_err(staging_err)
    }

    fn lock_for(&self, destination: &Path) -> Arc<Mutex<()>> {
        let mut in_flight = self.in_flight.lock();
        in_flight
            .entry(destination.to_path_buf())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Copy to a sibling temp file, then rename, so a torn copy is never
    /// seen as staged.
    fn copy_into_place(&self, asset: &ModelAsset) -> io::Result<()> {
        let mut input = self.source.open(&asset.bundle_path)?;
        let partial = self.cache_dir.join(format!(".{}.partial", asset.name));

        let result = (|| -> io::Result<()> {
            let mut output = File::create(&partial)?;
            let bytes = io::copy(&mut input, &mut output)?;
            output.flush()?;
            output.sync_all()?;
            fs::rename(&partial, &asset.destination)?;
            debug!("Copied {} bytes for {}", bytes, asset.name);
            Ok(())
        })();

        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains('/')
        || name.contains('\\');
    if invalid {
        return Err(PipelineError::Staging {
            name: name.to_string(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "asset names must be plain file names",
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// In-memory bundle that counts opens.
    struct CountingSource {
        files: HashMap<String, Vec<u8>>,
        opens: Arc<AtomicUsize>,
    }

    impl AssetSource for CountingSource {
        fn open(&self, path: &str) -> io::Result<Box<dyn Read + Send + '_>> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            match self.files.get(path) {
                Some(bytes) => Ok(Box::new(io::Cursor::new(bytes.clone()))),
                None => Err(io::Error::new(io::ErrorKind::NotFound, path.to_string())),
            }
        }
    }

    fn counting_stager(cache_root: &Path) -> (AssetStager, Arc<AtomicUsize>) {
        let opens = Arc::new(AtomicUsize::new(0));
        let mut files = HashMap::new();
        files.insert("opencv/age_net.bin".to_string(), b"weights".to_vec());
        let source = CountingSource {
            files,
            opens: opens.clone(),
        };
        let stager = AssetStager::new(Box::new(source), "opencv", cache_root, "opencv");
        (stager, opens)
    }

    #[test]
    fn test_stage_copies_once() {
        let dir = tempdir().unwrap();
        let (stager, opens) = counting_stager(dir.path());

        let first = stager.stage("age_net.bin").unwrap();
        let second = stager.stage("age_net.bin").unwrap();

        assert_eq!(first, second);
        assert!(first.is_absolute());
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert_eq!(fs::read(&first).unwrap(), b"weights");
    }

    #[test]
    fn test_stage_creates_cache_dir() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("nested").join("cache");
        let (stager, _) = counting_stager(&root);

        let path = stager.stage("age_net.bin").unwrap();
        assert!(path.starts_with(fs::canonicalize(root.join("opencv")).unwrap()));
    }

    #[test]
    fn test_existing_file_is_reused_verbatim() {
        let dir = tempdir().unwrap();
        let (stager, opens) = counting_stager(dir.path());
        fs::create_dir_all(stager.cache_dir()).unwrap();
        fs::write(stager.cache_dir().join("age_net.bin"), b"stale").unwrap();

        let path = stager.stage("age_net.bin").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"stale");
        assert_eq!(opens.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_missing_asset_is_staging_error() {
        let dir = tempdir().unwrap();
        let (stager, _) = counting_stager(dir.path());

        let err = stager.stage("missing.onnx").unwrap_err();
        assert!(matches!(err, PipelineError::Staging { ref name, .. } if name == "missing.onnx"));
        // Nothing half-written is left behind.
        assert!(!stager.cache_dir().join("missing.onnx").exists());
        assert!(!stager.cache_dir().join(".missing.onnx.partial").exists());
    }

    #[test]
    fn test_rejects_path_like_names() {
        let dir = tempdir().unwrap();
        let (stager, _) = counting_stager(dir.path());

        for name in ["", "..", "../etc/passwd", "a/b"] {
            assert!(stager.stage(name).is_err(), "{name:?} should be rejected");
        }
    }

    #[test]
    fn test_dir_asset_source() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("opencv")).unwrap();
        fs::write(dir.path().join("opencv/model.onnx"), b"onnx").unwrap();

        let cache = tempdir().unwrap();
        let stager = AssetStager::new(
            Box::new(DirAssetSource::new(dir.path())),
            "opencv",
            cache.path(),
            "models",
        );

        let asset = stager.asset("model.onnx").unwrap();
        assert_eq!(asset.bundle_path, "opencv/model.onnx");
        assert_eq!(asset.destination, cache.path().join("models/model.onnx"));

        let path = stager.stage("model.onnx").unwrap();
        assert_eq!(fs::read(path).unwrap(), b"onnx");
    }
}
