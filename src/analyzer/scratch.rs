use std::path::{Path, PathBuf};

use super::ResolutionError;

/// Exclusively-owned scratch directory for the duration of one resolution.
///
/// Acquisition fails if the directory already exists. The directory (if it
/// was created meanwhile) is removed when the guard drops, on every exit path.
#[derive(Debug)]
pub struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    pub fn acquire(path: impl Into<PathBuf>) -> Result<Self, ResolutionError> {
        let path = path.into();
        if path.exists() {
            return Err(ResolutionError::DirtyWorkingTree { path });
        }
        Ok(ScratchDir { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.path.exists() {
            return;
        }
        match std::fs::remove_dir_all(&self.path) {
            Ok(()) => tracing::debug!("Removed {}", self.path.display()),
            Err(e) => tracing::warn!("Failed to remove {}: {}", self.path.display(), e),
        }
    }
}
