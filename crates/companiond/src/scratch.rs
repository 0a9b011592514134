//! Scratch directory owned by a running server.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tempfile::TempDir;

const SCRATCH_PREFIX: &str = "companion-";

/// Temporary directory the server hands to executors and removes once it
/// reaches `Terminated`.
#[derive(Debug)]
pub struct TemporaryDirectory {
    path: PathBuf,
    directory: Mutex<Option<TempDir>>,
}

impl TemporaryDirectory {
    /// Creates a fresh directory under the system temporary location.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the directory.
    pub fn create() -> io::Result<Self> {
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir()
            .map(Self::from_temp_dir)
    }

    /// Creates a fresh directory under `root`.
    ///
    /// # Errors
    ///
    /// Returns the I/O error raised while creating the directory.
    pub fn create_in(root: &Path) -> io::Result<Self> {
        tempfile::Builder::new()
            .prefix(SCRATCH_PREFIX)
            .tempdir_in(root)
            .map(Self::from_temp_dir)
    }

    /// Adopts an existing temporary directory.
    #[must_use]
    pub fn from_temp_dir(directory: TempDir) -> Self {
        Self {
            path: directory.path().to_path_buf(),
            directory: Mutex::new(Some(directory)),
        }
    }

    /// Location of the directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the directory has been removed.
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }

    /// Removes the directory. Later calls are no-ops.
    pub(crate) fn release(&self) -> io::Result<()> {
        let taken = self
            .directory
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match taken {
            Some(directory) => directory.close(),
            None => Ok(()),
        }
    }
}
