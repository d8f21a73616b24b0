//! Plugin Runner - isolated execution of Brain-Score plugins
//!
//! Provides:
//! - Per-plugin test runs in a fresh conda environment
//! - Batch runs over a domain library with aggregated failures
//! - Scoring of a model on a benchmark in a fresh environment
//! - `wrap_score`, which picks in-process or isolated scoring

pub mod conda_score;
pub mod error;
pub mod test_runner;

// Re-export key types
pub use conda_score::{wrap_score, CondaScore};
pub use error::{Result, RunnerError};
pub use test_runner::{
    run_all_tests, run_args, run_specified_tests, PluginTestRunner, TestResults,
    GENERIC_PLUGIN_TEST_FILENAME, PLUGIN_TEST_ORDER, PYTEST_MARKERS, RECOGNIZED_TEST_FILES,
};
