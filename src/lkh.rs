//! LKH subprocess adapter for the TSP solver boundary.
//!
//! Each call gets its own work directory holding the problem, parameter and
//! tour files; the directory is removed once the tour has been read.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::TspError;
use crate::traits::TspSolver;
use crate::tsplib::{AtspProblem, parse_tour};

const PROBLEM_FILE: &str = "problem.atsp";
const PARAMS_FILE: &str = "problem.par";
const TOUR_FILE: &str = "problem.tour";

static CALL_COUNTER: AtomicUsize = AtomicUsize::new(0);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LkhConfig {
    /// Path to the LKH executable.
    pub executable: PathBuf,
    /// Parent directory for per-call work directories.
    pub work_dir: PathBuf,
    /// `RUNS` parameter; LKH's own default when unset.
    pub runs: Option<usize>,
    /// Keep the work directory after the call, for debugging.
    pub keep_files: bool,
}

impl Default for LkhConfig {
    fn default() -> Self {
        Self {
            executable: PathBuf::from("LKH"),
            work_dir: std::env::temp_dir().join("collection-planner-lkh"),
            runs: None,
            keep_files: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct LkhSolver {
    config: LkhConfig,
}

impl LkhSolver {
    pub fn new(config: LkhConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &LkhConfig {
        &self.config
    }

    fn call_dir(&self, problem: &AtspProblem) -> PathBuf {
        let name: String = problem
            .name
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let call = CALL_COUNTER.fetch_add(1, Ordering::Relaxed);
        self.config
            .work_dir
            .join(format!("{name}-{}-{call}", std::process::id()))
    }

    fn parameters(&self, dir: &Path) -> String {
        let mut params = format!(
            "PROBLEM_FILE = {}\nTOUR_FILE = {}\n",
            dir.join(PROBLEM_FILE).display(),
            dir.join(TOUR_FILE).display()
        );
        if let Some(runs) = self.config.runs {
            params.push_str(&format!("RUNS = {runs}\n"));
        }
        params
    }
}

/// Removes a work directory when dropped.
struct WorkDir {
    path: PathBuf,
    keep: bool,
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(err) = fs::remove_dir_all(&self.path) {
            tracing::warn!(dir = %self.path.display(), %err, "failed to remove lkh work dir");
        }
    }
}

impl TspSolver for LkhSolver {
    fn solve(&self, problem: &AtspProblem) -> Result<Vec<usize>, TspError> {
        let path = self.call_dir(problem);
        fs::create_dir_all(&path)?;
        let work_dir = WorkDir {
            path,
            keep: self.config.keep_files,
        };

        let params_path = work_dir.path.join(PARAMS_FILE);
        fs::write(work_dir.path.join(PROBLEM_FILE), problem.to_string())?;
        fs::write(&params_path, self.parameters(&work_dir.path))?;

        tracing::debug!(
            name = %problem.name,
            dimension = problem.dimension(),
            "running lkh"
        );
        let output = Command::new(&self.config.executable)
            .arg(&params_path)
            .current_dir(&work_dir.path)
            .output()?;
        if !output.status.success() {
            return Err(TspError::ProcessFailed {
                context: format!("lkh exited with {} for {}", output.status, problem.name),
                stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        let tour = fs::read_to_string(work_dir.path.join(TOUR_FILE))?;
        parse_tour(&tour)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parameters_point_into_the_call_dir() {
        let solver = LkhSolver::new(LkhConfig {
            runs: Some(3),
            ..LkhConfig::default()
        });
        let params = solver.parameters(Path::new("/tmp/call"));
        assert!(params.contains("PROBLEM_FILE = /tmp/call/problem.atsp\n"));
        assert!(params.contains("TOUR_FILE = /tmp/call/problem.tour\n"));
        assert!(params.contains("RUNS = 3\n"));
    }

    #[test]
    fn call_dirs_are_unique_and_sanitized() {
        let solver = LkhSolver::default();
        let problem = AtspProblem::new("route/1 x", vec![vec![0]]).unwrap();
        let first = solver.call_dir(&problem);
        let second = solver.call_dir(&problem);
        assert_ne!(first, second);
        let name = first.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("route_1_x-"));
    }

    #[test]
    fn missing_executable_is_an_io_error_and_cleans_up() {
        let work_dir = std::env::temp_dir().join(format!("lkh-missing-{}", std::process::id()));
        let solver = LkhSolver::new(LkhConfig {
            executable: PathBuf::from("/nonexistent/LKH"),
            work_dir: work_dir.clone(),
            runs: None,
            keep_files: false,
        });
        let problem = AtspProblem::new("r", vec![vec![0, 1], vec![1, 0]]).unwrap();
        assert!(matches!(solver.solve(&problem), Err(TspError::Io(_))));
        let leftovers = fs::read_dir(&work_dir).map(|dir| dir.count()).unwrap_or(0);
        assert_eq!(leftovers, 0);
        let _ = fs::remove_dir_all(&work_dir);
    }
}
