//! Per-job scratch file lifecycle
//!
//! Every job that reaches the engine gets its own scratch file under the
//! configured temp directory. The file is reserved with `create_new`, so two
//! concurrent jobs can never share a path. Releasing a file deletes it unless
//! retention (`KEEP_TEMP_FILES`) is on; a file dropped without an explicit
//! release is cleaned up the same way. Deletion failures are logged and never
//! propagated.

use crate::error::{Result, ServiceError};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use uuid::Uuid;

/// What happened to a scratch file on release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// File removed from disk
    Deleted,
    /// Retention is on; file left in place
    Retained,
    /// File was already gone
    Missing,
    /// Removal failed; the error was logged
    Failed,
}

type LiveSet = Arc<Mutex<HashSet<PathBuf>>>;

fn untrack(live: &LiveSet, path: &Path) {
    live.lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(path);
}

fn remove_quietly(path: &Path) -> ReleaseOutcome {
    match fs::remove_file(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "removed temporary file");
            ReleaseOutcome::Deleted
        },
        Err(e) if e.kind() == ErrorKind::NotFound => ReleaseOutcome::Missing,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to remove temporary file");
            ReleaseOutcome::Failed
        },
    }
}

/// Scratch file owned by a single job
#[derive(Debug)]
pub struct TempFile {
    path: PathBuf,
    job_id: Uuid,
    keep: bool,
    live: LiveSet,
    released: bool,
}

impl TempFile {
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// Replace the file contents (blocking)
    ///
    /// # Errors
    /// - `Storage` if the scratch file cannot be written
    pub fn write_all(&self, data: &[u8]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| ServiceError::scratch_io_error("open scratch file", &self.path, &e))?;
        file.write_all(data)
            .and_then(|()| file.flush())
            .map_err(|e| ServiceError::scratch_io_error("write scratch file", &self.path, &e))
    }

    /// Read the file contents (blocking)
    ///
    /// # Errors
    /// - `Storage` if the scratch file cannot be read
    pub fn read(&self) -> Result<Vec<u8>> {
        fs::read(&self.path)
            .map_err(|e| ServiceError::scratch_io_error("read scratch file", &self.path, &e))
    }

    /// Release the file, deleting it unless retention is on
    pub fn release(mut self) -> ReleaseOutcome {
        self.finish()
    }

    fn finish(&mut self) -> ReleaseOutcome {
        self.released = true;
        untrack(&self.live, &self.path);
        if self.keep {
            tracing::debug!(path = %self.path.display(), "keeping temporary file");
            ReleaseOutcome::Retained
        } else {
            remove_quietly(&self.path)
        }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if !self.released {
            self.finish();
        }
    }
}

/// Allocates and tracks scratch files under one directory
#[derive(Debug, Clone)]
pub struct TempFileManager {
    root: PathBuf,
    keep: bool,
    live: LiveSet,
}

impl TempFileManager {
    /// Create a manager rooted at `root`, creating the directory if needed
    ///
    /// # Errors
    /// - The directory cannot be created
    pub fn new<P: Into<PathBuf>>(root: P, keep_files: bool) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| ServiceError::file_io_error("create temp directory", &root, &e))?;
        Ok(Self {
            root,
            keep: keep_files,
            live: Arc::new(Mutex::new(HashSet::new())),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn keeps_files(&self) -> bool {
        self.keep
    }

    /// Reserve a fresh scratch file for a job
    ///
    /// The file is created empty; its name embeds the job id and a random
    /// suffix.
    ///
    /// # Errors
    /// - The temp directory is not writable
    pub fn allocate(&self, job_id: Uuid, extension: &str) -> Result<TempFile> {
        // The root may have been removed by an external cleaner since startup
        fs::create_dir_all(&self.root)
            .map_err(|e| ServiceError::file_io_error("create temp directory", &self.root, &e))?;

        loop {
            let name = format!("{}-{}.{}", job_id, Uuid::new_v4().simple(), extension);
            let path = self.root.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(_) => {
                    self.live
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .insert(path.clone());
                    tracing::debug!(path = %path.display(), %job_id, "allocated temporary file");
                    return Ok(TempFile {
                        path,
                        job_id,
                        keep: self.keep,
                        live: Arc::clone(&self.live),
                        released: false,
                    });
                },
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {},
                Err(e) => {
                    return Err(ServiceError::storage(format!(
                        "Failed to allocate temporary file '{}': {}",
                        path.display(),
                        e
                    )));
                },
            }
        }
    }

    /// Release a job's scratch file
    pub fn release(&self, file: TempFile) -> ReleaseOutcome {
        file.release()
    }

    /// Number of allocated files not yet released
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Remove every file still tracked (teardown)
    ///
    /// Honors retention. Returns how many files were deleted.
    pub fn sweep(&self) -> usize {
        let paths: Vec<PathBuf> = self
            .live
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        if self.keep {
            return 0;
        }
        paths
            .iter()
            .filter(|path| remove_quietly(path) == ReleaseOutcome::Deleted)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_allocate_creates_unique_files_per_job() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), false).unwrap();
        let job = Uuid::new_v4();

        let a = manager.allocate(job, "png").unwrap();
        let b = manager.allocate(job, "png").unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(dir.path()));
        assert!(a.path().exists());
        assert!(a
            .path()
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(&job.to_string()));
        assert_eq!(manager.live_count(), 2);
    }

    #[test]
    fn test_vanished_scratch_file_is_storage_error() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), false).unwrap();
        let file = manager.allocate(Uuid::new_v4(), "png").unwrap();
        fs::remove_file(file.path()).unwrap();

        assert!(matches!(file.read(), Err(ServiceError::Storage(_))));
        assert!(matches!(
            crate::services::ImageIOService::load_image(file.path()),
            Err(ServiceError::Storage(_))
        ));
        assert_eq!(manager.release(file), ReleaseOutcome::Missing);
    }

    #[test]
    fn test_release_deletes_without_retention() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), false).unwrap();
        let file = manager.allocate(Uuid::new_v4(), "bin").unwrap();
        file.write_all(b"scratch").unwrap();
        assert_eq!(file.read().unwrap(), b"scratch");
        let path = file.path().to_path_buf();

        assert_eq!(manager.release(file), ReleaseOutcome::Deleted);
        assert!(!path.exists());
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_release_keeps_with_retention() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), true).unwrap();
        let file = manager.allocate(Uuid::new_v4(), "bin").unwrap();
        let path = file.path().to_path_buf();

        assert_eq!(file.release(), ReleaseOutcome::Retained);
        assert!(path.exists());
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_drop_without_release_cleans_up() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), false).unwrap();
        let path = {
            let file = manager.allocate(Uuid::new_v4(), "bin").unwrap();
            file.path().to_path_buf()
        };
        assert!(!path.exists());
        assert_eq!(manager.live_count(), 0);
    }

    #[test]
    fn test_missing_file_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path(), false).unwrap();
        let file = manager.allocate(Uuid::new_v4(), "bin").unwrap();
        fs::remove_file(file.path()).unwrap();

        assert_eq!(file.release(), ReleaseOutcome::Missing);
    }

    #[test]
    fn test_sweep_removes_outstanding_files() {
        let dir = TempDir::new().unwrap();
        let manager = TempFileManager::new(dir.path().join("nested"), false).unwrap();
        let a = manager.allocate(Uuid::new_v4(), "bin").unwrap();
        let b = manager.allocate(Uuid::new_v4(), "bin").unwrap();
        let (pa, pb) = (a.path().to_path_buf(), b.path().to_path_buf());
        std::mem::forget(a);
        std::mem::forget(b);

        assert_eq!(manager.sweep(), 2);
        assert!(!pa.exists());
        assert!(!pb.exists());
        assert_eq!(manager.live_count(), 0);
    }
}
