//! Invocation of the external `lp_solve` binary.
//!
//! The constructors emit text in the `lp_solve` dialect; this module locates
//! the solver, runs it synchronously and parses its `-S2` output (four
//! header lines, then `name  value` pairs). Solver absence is detected by a
//! one-variable health check; LP-based methods are skipped in that case and
//! report infinite bounds.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;

use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum LpError {
    #[error("no usable lp_solve executable was found")]
    SolverUnavailable,

    #[error("lp_solve returned no solution (infeasible or unbounded program)")]
    Unsolved,

    #[error("failed to run lp_solve: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected lp_solve output: {0}")]
    Parse(String),

    #[error(transparent)]
    Model(#[from] crate::model::LpModelError),
}

/// Parse `lp_solve -S2` output: skip the four header lines, read
/// `name value` pairs until the end.
pub fn parse_values(stdout: &str) -> HashMap<String, f64> {
    let mut values = HashMap::new();
    for line in stdout.lines().skip(4) {
        let mut tokens = line.split_whitespace();
        let (Some(name), Some(value)) = (tokens.next(), tokens.next()) else {
            continue;
        };
        if let Ok(value) = value.parse::<f64>() {
            values.insert(name.to_string(), value);
        }
    }
    values
}

/// Handle to a located and health-checked `lp_solve` executable.
#[derive(Debug, Clone)]
pub struct LpSolver {
    binary: PathBuf,
}

impl LpSolver {
    /// Locate `lp_solve`.
    ///
    /// Search order: the explicit override, the system path (both common
    /// spellings), the working directory. The candidate must pass the
    /// health check before being accepted.
    pub fn locate(override_path: Option<&Path>) -> Result<Self, LpError> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(path) = override_path {
            candidates.push(path.to_path_buf());
        }
        for name in ["lp_solve", "lpsolve"] {
            if let Ok(path) = which::which(name) {
                candidates.push(path);
            }
        }
        candidates.push(PathBuf::from("./lp_solve"));

        for candidate in candidates {
            if !candidate.exists() {
                continue;
            }
            let solver = Self {
                binary: candidate.clone(),
            };
            match solver.health_check() {
                Ok(()) => {
                    debug!(binary = %candidate.display(), "lp_solve located");
                    return Ok(solver);
                }
                Err(err) => {
                    warn!(binary = %candidate.display(), %err, "rejecting lp_solve candidate");
                }
            }
        }
        Err(LpError::SolverUnavailable)
    }

    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// Solve a trivial two-variable program and verify the parsed answer is
    /// exactly `x = 2, y = 3`.
    pub fn health_check(&self) -> Result<(), LpError> {
        let dir = std::env::temp_dir();
        let path = dir.join(format!("saihu-lp-health-{}.lp", std::process::id()));
        let mut file = std::fs::File::create(&path)?;
        writeln!(file, "max: x + y;")?;
        writeln!(file, "x <= 2;")?;
        writeln!(file, "y <= 3;")?;
        drop(file);
        let result = self.solve_file(&path);
        let _ = std::fs::remove_file(&path);
        let values = result?;
        if values.get("x") == Some(&2.0) && values.get("y") == Some(&3.0) {
            Ok(())
        } else {
            Err(LpError::Parse(format!(
                "health check expected x=2, y=3, got {values:?}"
            )))
        }
    }

    /// Run `lp_solve -S2 <file>` and parse the variable values. An empty
    /// value set means the program was not solved.
    pub fn solve_file(&self, program: &Path) -> Result<HashMap<String, f64>, LpError> {
        let output = Command::new(&self.binary)
            .arg("-S2")
            .arg(program)
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        let values = parse_values(&stdout);
        if values.is_empty() {
            return Err(LpError::Unsolved);
        }
        Ok(values)
    }

    /// Run the solver and return the objective value only (`-S1` output:
    /// the last token of the report).
    pub fn solve_objective(&self, program: &Path) -> Result<f64, LpError> {
        let output = Command::new(&self.binary)
            .arg("-S1")
            .arg(program)
            .output()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .split_whitespace()
            .last()
            .and_then(|token| token.parse::<f64>().ok())
            .ok_or(LpError::Unsolved)
    }
}

/// Write an LP program to a file in the given directory.
pub fn write_program(dir: &Path, name: &str, text: &str) -> Result<PathBuf, LpError> {
    let path = dir.join(name);
    std::fs::write(&path, text)?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_values_skips_header() {
        let stdout = "\nValue of objective function: 5.00000000\n\nActual values of the variables:\nx                               2\ny                               3\n";
        let values = parse_values(stdout);
        assert_eq!(values.get("x"), Some(&2.0));
        assert_eq!(values.get("y"), Some(&3.0));
    }

    #[test]
    fn test_parse_values_empty_output() {
        assert!(parse_values("").is_empty());
        assert!(parse_values("a\nb\nc\nd\n").is_empty());
    }

    #[test]
    fn test_locate_missing_solver() {
        // an override pointing nowhere and no system solver named this way
        let missing = Path::new("/nonexistent/lp_solve_missing");
        match LpSolver::locate(Some(missing)) {
            Err(LpError::SolverUnavailable) => {}
            Ok(solver) => {
                // a real lp_solve on the system path is acceptable
                assert!(solver.binary().exists());
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }
}
