//! Scoped temp-file cleanup.
//!
//! Generalizes the sibling crates' ad-hoc `let _ = std::fs::remove_file(...)`
//! calls into a single reusable guard: construct one next to the path you
//! just wrote, and it unlinks the file when it goes out of scope — on the
//! success path, an early return, or a `?`-propagated error alike.
//! Deletion failures are logged and never propagated.

use std::path::{Path, PathBuf};

pub struct TempFileGuard {
    path: PathBuf,
}

impl TempFileGuard {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TempFileGuard {
    fn drop(&mut self) {
        remove_file_logged(&self.path);
    }
}

/// Remove a file, logging (never propagating) any failure other than
/// "already gone".
pub fn remove_file_logged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            crate::warn!("failed to remove temp file {}: {}", path.display(), e);
        }
    }
}
