//! Completion store: the output directory as a resumability checkpoint.
//!
//! Every successfully converted diagram is written to
//! `<output_dir>/<sanitized name>.<ext>` before the converter reports it.
//! On the next run [`CompletionStore::scan`] reads those files back, so the
//! orchestrator can skip their conversion and still upload them.
//!
//! Writes go through a `.tmp` sibling and a rename, so a run killed
//! mid-write never leaves a truncated artifact that would later be mistaken
//! for a finished conversion.

use crate::diagram::Diagram;
use crate::error::MigrateError;
use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Diagrams recovered from a previous run's output.
#[derive(Debug, Default)]
pub struct Completed {
    /// Artifact stems present on disk.
    pub names: HashSet<String>,
    /// Diagrams rebuilt from those artifacts (name = stem, payload = file bytes).
    pub diagrams: Vec<Diagram>,
}

impl Completed {
    /// Whether `diagram` already has an artifact.
    pub fn contains(&self, diagram: &Diagram) -> bool {
        self.names.contains(&diagram.artifact_stem())
    }
}

/// Reads and writes converted artifacts under one directory.
#[derive(Debug, Clone)]
pub struct CompletionStore {
    dir: PathBuf,
    extension: String,
}

impl CompletionStore {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            extension: extension.into(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the artifact for `diagram`. Pure in the diagram name.
    pub fn artifact_path(&self, diagram: &Diagram) -> PathBuf {
        self.dir
            .join(format!("{}.{}", diagram.artifact_stem(), self.extension))
    }

    /// Create the directory if needed and load every artifact in it.
    pub async fn scan(&self) -> Result<Completed, MigrateError> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| self.fs_error(&self.dir, e))?;

        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| self.fs_error(&self.dir, e))?;

        let mut completed = Completed::default();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| self.fs_error(&self.dir, e))?
        {
            let path = entry.path();
            let Some(stem) = self.artifact_stem_of(&path) else {
                continue;
            };
            let file_type = entry.file_type().await.map_err(|e| self.fs_error(&path, e))?;
            if !file_type.is_file() {
                continue;
            }

            let payload = tokio::fs::read(&path)
                .await
                .map_err(|e| self.fs_error(&path, e))?;
            debug!(name = %stem, bytes = payload.len(), "Recovered artifact");
            completed.names.insert(stem.clone());
            completed.diagrams.push(Diagram::new(stem, payload));
        }

        // Directory iteration order is platform-defined.
        completed.diagrams.sort_by(|a, b| a.name.cmp(&b.name));

        info!(
            "Found {} converted artifacts in {}",
            completed.diagrams.len(),
            self.dir.display()
        );
        Ok(completed)
    }

    /// Atomically write the converted `diagram` and return its path.
    pub async fn write(&self, diagram: &Diagram) -> io::Result<PathBuf> {
        let path = self.artifact_path(diagram);
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &diagram.payload).await?;
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e);
        }
        debug!(name = %diagram.name, path = %path.display(), "Checkpointed");
        Ok(path)
    }

    /// Stem of `path` if it is an artifact of this store.
    fn artifact_stem_of(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?;
        if ext != self.extension {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        if stem.is_empty() {
            return None;
        }
        Some(stem.to_string())
    }

    fn fs_error(&self, path: &Path, source: io::Error) -> MigrateError {
        MigrateError::Filesystem {
            path: path.to_path_buf(),
            source,
        }
    }
}
