use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::StorageError;
use crate::sanitize::{generated_name, redact_path};

/// Top-level directory per operation family.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Family {
    Excel,
    Pdf,
    Converter,
}

impl Family {
    pub fn dir_name(self) -> &'static str {
        match self {
            Family::Excel => "excel",
            Family::Pdf => "pdf",
            Family::Converter => "converter",
        }
    }
}

/// Second-level directory: where in its life a file is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Uploads land here before processing.
    Temp,
    Processed,
    Merged,
    Split,
    Compressed,
    Watermarked,
    Converted,
}

impl Stage {
    pub fn dir_name(self) -> &'static str {
        match self {
            Stage::Temp => "temp",
            Stage::Processed => "processed",
            Stage::Merged => "merged",
            Stage::Split => "split",
            Stage::Compressed => "compressed",
            Stage::Watermarked => "watermarked",
            Stage::Converted => "converted",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A reserved, empty file whose name nobody else holds.
#[derive(Debug, Clone)]
pub struct Reserved {
    pub path: PathBuf,
    pub stored_name: String,
}

/// The `<root>/<family>/<stage>` file tree.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of a stage directory, created on demand.
    pub fn dir(&self, family: Family, stage: Stage) -> Result<PathBuf, StorageError> {
        let path = self.root.join(family.dir_name()).join(stage.dir_name());
        ensure_directory(&path)?;
        Ok(path)
    }

    /// Reserves a collision-free file for `original_name` in a stage
    /// directory. The name keeps the original base and extension.
    pub fn reserve(
        &self,
        family: Family,
        stage: Stage,
        original_name: &str,
        extension: &str,
    ) -> Result<Reserved, StorageError> {
        let dir = self.dir(family, stage)?;
        reserve_in(&dir, original_name, extension)
    }

    /// Creates a fresh directory for one multi-output operation (split),
    /// so its outputs can use plain names like `page_001.pdf`.
    pub fn operation_dir(
        &self,
        family: Family,
        stage: Stage,
        original_name: &str,
    ) -> Result<PathBuf, StorageError> {
        let parent = self.dir(family, stage)?;
        for _ in 0..MAX_ATTEMPTS {
            let candidate = parent.join(generated_name(original_name, None));
            match std::fs::create_dir(&candidate) {
                Ok(()) => return Ok(candidate),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(StorageError::CreateDirectory {
                        path: candidate,
                        source: e,
                    })
                }
            }
        }
        Err(StorageError::FileExists(parent))
    }

    /// Removes files, logging instead of failing. Used for cleanup after
    /// the rows that referenced them are gone.
    pub fn remove_quietly<P: AsRef<Path>>(&self, paths: &[P]) -> usize {
        let mut removed = 0;
        for path in paths {
            let path = path.as_ref();
            match std::fs::remove_file(path) {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    tracing::warn!(file = %redact_path(path), error = %e, "Failed to remove file");
                }
            }
            if let Some(parent) = path.parent() {
                self.prune_empty_operation_dir(parent);
            }
        }
        removed
    }

    /// Drops an emptied per-operation directory under a `split` stage.
    fn prune_empty_operation_dir(&self, dir: &Path) {
        let is_operation_dir = dir
            .parent()
            .and_then(|p| p.file_name())
            .map(|n| n == Stage::Split.dir_name())
            .unwrap_or(false);
        if is_operation_dir && dir.starts_with(&self.root) {
            // remove_dir refuses non-empty directories.
            let _ = std::fs::remove_dir(dir);
        }
    }
}

const MAX_ATTEMPTS: usize = 16;

/// Atomically creates an empty file with a generated name (O_CREAT | O_EXCL),
/// retrying with a new random suffix on collision.
pub fn reserve_in(dir: &Path, original_name: &str, extension: &str) -> Result<Reserved, StorageError> {
    ensure_directory(dir)?;
    for _ in 0..MAX_ATTEMPTS {
        let stored_name = generated_name(original_name, Some(extension));
        let path = dir.join(&stored_name);
        match std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
        {
            Ok(_) => return Ok(Reserved { path, stored_name }),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(StorageError::WriteFile { path, source: e }),
        }
    }
    Err(StorageError::FileExists(dir.join(original_name)))
}

fn ensure_directory(path: &Path) -> Result<(), StorageError> {
    if !path.exists() {
        std::fs::create_dir_all(path).map_err(|e| StorageError::CreateDirectory {
            path: path.to_path_buf(),
            source: e,
        })?;
    }
    Ok(())
}
