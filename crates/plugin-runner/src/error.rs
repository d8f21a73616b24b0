//! Error types for plugin-runner

use std::collections::BTreeMap;
use std::path::PathBuf;

use brainscore_core::BrainscoreError;
use conda_env_manager::EnvError;
use thiserror::Error;

/// Errors raised while testing or scoring plugins
#[derive(Error, Debug)]
pub enum RunnerError {
    /// Plugin directory holds no recognized test file
    #[error("No test files matching '{pattern}' found in {}", plugin_dir.display())]
    NoTestFiles { plugin_dir: PathBuf, pattern: String },

    /// A test file passed explicitly does not look like a test file
    #[error("Test file {0} not recognized as test file, must match 'test.*\\.py'.")]
    UnrecognizedTestFile(String),

    /// A test file path does not sit inside a plugin directory
    #[error("Filepath {0} not recognized as plugin test file.")]
    NotAPluginTestFile(String),

    /// A test file passed explicitly does not exist
    #[error("Test file {} does not exist", .0.display())]
    MissingTestFile(PathBuf),

    /// Plugin directory path is too shallow to derive type and library
    #[error("{} is not a plugin directory of a domain library", .0.display())]
    InvalidPluginDirectory(PathBuf),

    /// One or more plugin test runs failed
    #[error("{} plugin test run(s) failed: {failures:?}", failures.len())]
    PluginTestsFailed { failures: BTreeMap<String, i32> },

    /// Scoring in the isolated environment exited non-zero
    #[error("Scoring {model} on {benchmark} failed with return code {return_code}: {stderr}")]
    ScoringFailed {
        model: String,
        benchmark: String,
        return_code: i32,
        stderr: String,
    },

    /// Environment lifecycle error
    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    /// Core error (handoff, locator)
    #[error("core error: {0}")]
    Core(#[from] BrainscoreError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for plugin-runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failures_lists_every_plugin() {
        let mut failures = BTreeMap::new();
        failures.insert("models__alexnet".to_string(), 1);
        failures.insert("benchmarks__rajalingham2018".to_string(), 2);
        let err = RunnerError::PluginTestsFailed { failures };
        let msg = err.to_string();
        assert!(msg.starts_with("2 plugin test run(s) failed"));
        assert!(msg.contains("models__alexnet"));
        assert!(msg.contains("benchmarks__rajalingham2018"));
    }

    #[test]
    fn test_unrecognized_test_file_message() {
        let err = RunnerError::UnrecognizedTestFile("helpers.py".into());
        assert_eq!(
            err.to_string(),
            "Test file helpers.py not recognized as test file, must match 'test.*\\.py'."
        );
    }
}
