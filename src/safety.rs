use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error;
use xxhash_rust::xxh3::xxh3_64;

/// Fingerprint of a board image as it was read, used to refuse overwriting a
/// file that changed underneath an edit.
#[derive(Debug, Clone)]
pub struct SourceGuard {
    /// Canonical path of the source file
    path: PathBuf,
    len: u64,
    hash: u64,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("{path} changed on disk since it was loaded")]
    SourceChanged { path: PathBuf },

    #[error("Path has no parent directory: {path}")]
    NoParent { path: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceGuard {
    /// Read `path` and remember its fingerprint.
    ///
    /// Returns the guard together with the bytes that were fingerprinted, so
    /// callers decode exactly what the guard describes.
    pub fn capture(path: impl AsRef<Path>) -> Result<(Self, Vec<u8>), SafetyError> {
        let path = path.as_ref().canonicalize()?;
        let bytes = fs::read(&path)?;
        let guard = Self {
            path,
            len: bytes.len() as u64,
            hash: xxh3_64(&bytes),
        };
        tracing::debug!(path = %guard.path.display(), len = guard.len, "captured source fingerprint");
        Ok((guard, bytes))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Re-read the source and confirm it still matches the fingerprint.
    ///
    /// Call this immediately before overwriting the source.
    pub fn revalidate(&self) -> Result<(), SafetyError> {
        let changed = || SafetyError::SourceChanged {
            path: self.path.clone(),
        };
        let metadata = fs::metadata(&self.path).map_err(|_| changed())?;
        if metadata.len() != self.len {
            return Err(changed());
        }
        let bytes = fs::read(&self.path).map_err(|_| changed())?;
        if xxh3_64(&bytes) != self.hash {
            return Err(changed());
        }
        Ok(())
    }

    /// Whether `target` names the guarded source file.
    pub fn is_source(&self, target: &Path) -> bool {
        target
            .canonicalize()
            .is_ok_and(|canonical| canonical == self.path)
    }

    /// Write `bytes` to `target`, revalidating first when `target` is the source.
    pub fn write(&self, target: &Path, bytes: &[u8]) -> Result<(), SafetyError> {
        if self.is_source(target) {
            self.revalidate()?;
        }
        atomic_write(target, bytes)
    }
}

/// Atomic file write: tempfile + fsync + rename.
///
/// The tempfile lives in the target's directory so the rename stays on one
/// filesystem.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), SafetyError> {
    let parent = match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Path::new("."),
        Some(parent) => parent,
        None => {
            return Err(SafetyError::NoParent {
                path: path.to_path_buf(),
            })
        }
    };

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    tracing::debug!(path = %path.display(), bytes = content.len(), "wrote file");
    Ok(())
}
