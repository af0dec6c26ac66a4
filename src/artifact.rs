//! Classifier artifact stores.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::classifier::{ClassifierModel, RawClassifierModel};
use crate::error::ArtifactError;
use crate::traits::ArtifactStore;

/// Stores the artifact as a JSON file.
///
/// Saves go through a temporary sibling file and a rename, so readers never
/// observe a half-written artifact.
#[derive(Debug, Clone)]
pub struct FileArtifactStore {
    path: PathBuf,
}

impl FileArtifactStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> ArtifactError {
        ArtifactError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl ArtifactStore for FileArtifactStore {
    fn load(&self) -> Result<Option<ClassifierModel>, ArtifactError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(self.io_error(err)),
        };
        let raw: RawClassifierModel =
            serde_json::from_str(&raw).map_err(|source| ArtifactError::Serde {
                path: self.path.display().to_string(),
                source,
            })?;
        let version = raw.version;
        ClassifierModel::try_from(raw)
            .map(Some)
            .map_err(|err| ArtifactError::Rejected {
                path: self.path.display().to_string(),
                version,
                reason: err.to_string(),
            })
    }

    fn save(&self, model: &ClassifierModel) -> Result<(), ArtifactError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| self.io_error(err))?;
        }

        let tmp_path = self.path.with_extension("tmp");
        let file = File::create(&tmp_path).map_err(|err| self.io_error(err))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, model).map_err(|source| ArtifactError::Serde {
            path: tmp_path.display().to_string(),
            source,
        })?;
        writer.flush().map_err(|err| self.io_error(err))?;
        fs::rename(&tmp_path, &self.path).map_err(|err| self.io_error(err))?;
        Ok(())
    }
}

/// Keeps the artifact in memory. Useful for tests and ephemeral processes.
#[derive(Debug, Default)]
pub struct InMemoryArtifactStore {
    model: Mutex<Option<ClassifierModel>>,
    saves: AtomicUsize,
}

impl InMemoryArtifactStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(model: ClassifierModel) -> Self {
        Self {
            model: Mutex::new(Some(model)),
            saves: AtomicUsize::new(0),
        }
    }

    /// Number of successful saves.
    pub fn saves(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self) -> Option<ClassifierModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

impl ArtifactStore for InMemoryArtifactStore {
    fn load(&self) -> Result<Option<ClassifierModel>, ArtifactError> {
        Ok(self.stored())
    }

    fn save(&self, model: &ClassifierModel) -> Result<(), ArtifactError> {
        *self.model.lock().unwrap_or_else(PoisonError::into_inner) = Some(model.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
