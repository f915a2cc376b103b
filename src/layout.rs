//! Routine directory layout
//!
//! ```text
//! <working_dir>/Routine_<YYYY-mm-dd_HH-MM-SS>/<Optim|DoE>/
//!     Geometry/iter_<n>.json      shared-file snapshots
//!     Runs/Run<n>/<Module>/       per-evaluation module files
//!     Variable_library.csv
//!     Variable_history.csv
//!     ...
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::error::{Result, RoutineError};

#[derive(Debug, Clone)]
pub struct RoutineLayout {
    root: PathBuf,
}

fn mkdir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| RoutineError::io(path, e))
}

impl RoutineLayout {
    /// Create a fresh timestamped routine directory under `working_dir`.
    pub fn create(working_dir: &Path, routine_type: &str) -> Result<Self> {
        let stamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string();
        let mut base = working_dir.join(format!("Routine_{stamp}"));
        let mut n = 1;
        while base.exists() {
            n += 1;
            base = working_dir.join(format!("Routine_{stamp}_{n}"));
        }
        Self::at(base.join(routine_type))
    }

    /// Use `root` as the routine directory, creating its subdirectories.
    /// The stored root is absolute: module processes run inside their run
    /// directory and get file paths built from it.
    pub fn at(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let mut layout = Self { root: root.clone() };
        mkdir(&layout.geometry_dir())?;
        mkdir(&layout.runs_dir())?;
        layout.root = fs::canonicalize(&root).map_err(|e| RoutineError::io(&root, e))?;
        info!(root = %layout.root.display(), "routine directory ready");
        Ok(layout)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn geometry_dir(&self) -> PathBuf {
        self.root.join("Geometry")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.root.join("Runs")
    }

    /// Working directory of evaluation `n`; adapters create it when they
    /// first write there.
    pub fn run_dir(&self, n: u64) -> PathBuf {
        self.runs_dir().join(format!("Run{n}"))
    }

    pub fn snapshot_path(&self, n: u64) -> PathBuf {
        self.geometry_dir().join(format!("iter_{n}.json"))
    }

    pub fn library_csv(&self) -> PathBuf {
        self.root.join("Variable_library.csv")
    }

    pub fn history_csv(&self) -> PathBuf {
        self.root.join("Variable_history.csv")
    }

    pub fn cases_json(&self) -> PathBuf {
        self.root.join("cases.json")
    }

    pub fn registry_json(&self) -> PathBuf {
        self.root.join("variable_history.json")
    }

    pub fn summary_json(&self) -> PathBuf {
        self.root.join("summary.json")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn creates_subdirectories() {
        let tmp = tempfile::tempdir().unwrap();
        let layout = RoutineLayout::create(tmp.path(), "Optim").unwrap();
        assert!(layout.geometry_dir().is_dir());
        assert!(layout.runs_dir().is_dir());
        assert!(layout.root().ends_with("Optim"));
        let run = layout.run_dir(3);
        assert!(run.ends_with("Runs/Run3"));
        assert!(!run.exists());
        assert!(layout.snapshot_path(4).ends_with("Geometry/iter_4.json"));
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let cwd = std::env::current_dir().unwrap();
        let tmp = tempfile::tempdir_in(&cwd).unwrap();
        let relative = tmp.path().strip_prefix(&cwd).unwrap().join("routines/Routine_x/Optim");
        assert!(relative.is_relative());

        let layout = RoutineLayout::at(&relative).unwrap();
        assert!(layout.root().is_absolute());
        assert!(layout.root().ends_with("routines/Routine_x/Optim"));
        assert!(layout.run_dir(1).is_absolute());
        assert!(layout.geometry_dir().is_dir());
    }

    #[test]
    fn same_second_routines_do_not_collide() {
        let tmp = tempfile::tempdir().unwrap();
        let a = RoutineLayout::create(tmp.path(), "DoE").unwrap();
        let b = RoutineLayout::create(tmp.path(), "DoE").unwrap();
        assert_ne!(a.root(), b.root());
    }
}
