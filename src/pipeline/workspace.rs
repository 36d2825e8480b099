//! Per-run scratch directory.
//!
//! Every intermediate a run produces (page images, the composed document,
//! the scrubbed document) lives inside one [`WorkingArea`]. It wraps a
//! [`TempDir`], so the directory and everything in it is removed when the
//! value is dropped: on success, on error, and on panic.

use crate::error::RedactError;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};

/// Exclusively-owned scratch directory for a single run.
#[derive(Debug)]
pub struct WorkingArea {
    dir: TempDir,
}

impl WorkingArea {
    /// Create a fresh working area under `parent`, or the system temp dir.
    ///
    /// On unix the directory is created with mode `0700`.
    pub fn create(parent: Option<&Path>) -> Result<Self, RedactError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".redact-run-");
        let dir = match parent {
            Some(p) => builder.tempdir_in(p),
            None => builder.tempdir(),
        }
        .map_err(RedactError::WorkingArea)?;
        debug!("Working area created at {}", dir.path().display());
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Path of a document-level intermediate.
    pub fn file_path(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }

    /// Write an intermediate file into the working area.
    pub async fn write(&self, name: &str, bytes: &[u8]) -> Result<PathBuf, RedactError> {
        let p = self.file_path(name);
        tokio::fs::write(&p, bytes)
            .await
            .map_err(RedactError::WorkingArea)?;
        Ok(p)
    }

    /// Remove the working area now, surfacing any cleanup error.
    ///
    /// Dropping the value also removes it, but silently.
    pub fn close(self) -> Result<(), RedactError> {
        let path = self.path().to_path_buf();
        self.dir.close().map_err(|e| {
            warn!("Failed to remove working area {}: {}", path.display(), e);
            RedactError::WorkingArea(e)
        })?;
        debug!("Working area removed: {}", path.display());
        Ok(())
    }
}

/// `page-NNNN-<tag>.png`, 1-indexed and zero-padded so names sort in page order.
pub fn page_file_name(index: usize, tag: &str) -> String {
    format!("page-{:04}-{tag}.png", index + 1)
}
