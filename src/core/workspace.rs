//! Isolated on-disk directories for a run and its jobs.
//!
//! Layout: `<work_dir>/<run-id>/<job-id>/` with `src/` (checkout target and
//! step working directory) and `bin/` (job-private tool links). Jobs never
//! share a directory.

use std::path::{Path, PathBuf};

use serde::Serialize;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::utils::io;

#[derive(Debug, Clone, Serialize)]
pub struct RunWorkspace {
    pub run_id: String,
    pub root: PathBuf,
    pub keep: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JobWorkspace {
    pub root: PathBuf,
    pub src: PathBuf,
    pub bin: PathBuf,
}

impl RunWorkspace {
    /// Create `<work_dir>/<run-id>` with a fresh v4 run id.
    pub fn create(work_dir: &Path, keep: bool) -> Result<Self> {
        let run_id = Uuid::new_v4().to_string();
        let root = work_dir.join(&run_id);
        io::create_dir_all(&root, "create run workspace")?;
        log_status!("workspace", "Run directory {}", root.display());
        Ok(Self { run_id, root, keep })
    }

    pub fn job(&self, job_id: &str) -> Result<JobWorkspace> {
        let root = self.root.join(job_id);
        if root.exists() {
            return Err(Error::internal_unexpected(format!(
                "Job workspace {} already exists",
                root.display()
            )));
        }

        let workspace = JobWorkspace {
            src: root.join("src"),
            bin: root.join("bin"),
            root,
        };
        io::create_dir_all(&workspace.src, "create job workspace")?;
        io::create_dir_all(&workspace.bin, "create job workspace")?;
        Ok(workspace)
    }

    /// Remove the run directory unless workspaces are kept. Returns whether it was removed.
    pub fn finish(&self) -> Result<bool> {
        if self.keep {
            log_status!("workspace", "Keeping {}", self.root.display());
            return Ok(false);
        }

        std::fs::remove_dir_all(&self.root).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("remove {}", self.root.display())))
        })?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobs_get_distinct_directories() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunWorkspace::create(dir.path(), false).unwrap();
        let a = run.job("build-3-9").unwrap();
        let b = run.job("build-3-10").unwrap();

        assert_ne!(a.root, b.root);
        assert!(a.src.is_dir() && a.bin.is_dir());
        assert!(a.root.starts_with(&run.root));
        assert!(run.job("build-3-9").is_err());
    }

    #[test]
    fn finish_removes_unless_kept() {
        let dir = tempfile::tempdir().unwrap();
        let run = RunWorkspace::create(dir.path(), false).unwrap();
        run.job("one").unwrap();
        assert!(run.finish().unwrap());
        assert!(!run.root.exists());

        let kept = RunWorkspace::create(dir.path(), true).unwrap();
        assert!(!kept.finish().unwrap());
        assert!(kept.root.exists());
    }

    #[test]
    fn run_ids_are_unique() {
        let dir = tempfile::tempdir().unwrap();
        let a = RunWorkspace::create(dir.path(), true).unwrap();
        let b = RunWorkspace::create(dir.path(), true).unwrap();
        assert_ne!(a.run_id, b.run_id);
    }
}
