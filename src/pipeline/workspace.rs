//! # Run Workspace
//!
//! Each run gets a private directory `run-<uuid>-XXXXXX` under the configured work
//! directory. The uploaded file, split and resampled segments and the transient
//! feature table all live inside it.
//!
//! ## Cleanup:
//! The directory is removed when the `RunWorkspace` is dropped, on success, failure,
//! cancellation and unwinding alike. Removal errors are logged, never propagated.

use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug)]
pub struct RunWorkspace {
    run_id: Uuid,
    path: PathBuf,
    dir: Option<TempDir>,
}

impl RunWorkspace {
    /// Create a fresh directory under `work_dir` (created if missing).
    pub fn create(work_dir: &Path) -> std::io::Result<Self> {
        std::fs::create_dir_all(work_dir)?;
        let run_id = Uuid::new_v4();
        let dir = tempfile::Builder::new()
            .prefix(&format!("run-{}-", run_id))
            .tempdir_in(work_dir)?;
        let path = dir.path().to_path_buf();
        debug!(run_id = %run_id, path = %path.display(), "Created run workspace");
        Ok(Self { run_id, path, dir: Some(dir) })
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where the uploaded file is stored.
    pub fn input_path(&self, filename: &str) -> PathBuf {
        self.path.join(filename)
    }

    /// Transient feature table for this run.
    pub fn feature_table_path(&self) -> PathBuf {
        self.path.join("features.csv")
    }
}

impl Drop for RunWorkspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            match dir.close() {
                Ok(()) => debug!(run_id = %self.run_id, "Removed run workspace"),
                Err(e) => warn!(
                    run_id = %self.run_id,
                    path = %self.path.display(),
                    error = %e,
                    "Failed to remove run workspace"
                ),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspaces_are_distinct_and_removed() {
        let root = tempfile::tempdir().unwrap();
        let a = RunWorkspace::create(root.path()).unwrap();
        let b = RunWorkspace::create(root.path()).unwrap();

        assert_ne!(a.path(), b.path());
        assert!(a.path().file_name().unwrap().to_string_lossy().starts_with("run-"));

        std::fs::create_dir_all(a.path().join("split")).unwrap();
        std::fs::write(a.path().join("split/segment_001.wav"), b"x").unwrap();
        std::fs::write(a.input_path("upload.wav"), b"x").unwrap();

        let (path_a, path_b) = (a.path().to_path_buf(), b.path().to_path_buf());
        drop(a);
        drop(b);
        assert!(!path_a.exists());
        assert!(!path_b.exists());
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_missing_work_dir_is_created() {
        let root = tempfile::tempdir().unwrap();
        let nested = root.path().join("processed/nested");
        let workspace = RunWorkspace::create(&nested).unwrap();
        assert!(workspace.path().starts_with(&nested));
    }
}
