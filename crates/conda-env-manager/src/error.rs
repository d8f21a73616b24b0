//! Error types for conda-env-manager

use thiserror::Error;

/// Errors that can occur while managing plugin environments
#[derive(Error, Debug)]
pub enum EnvError {
    /// Executable could not be spawned
    #[error("Executable not found or not runnable: {0}")]
    ExecutableNotFound(String),

    /// A lifecycle command returned a non-zero exit code
    #[error("Command `{command}` failed with return code {return_code}: {stderr}")]
    CommandFailed {
        command: String,
        return_code: i32,
        stderr: String,
    },

    /// Command exceeded its timeout
    #[error("Command `{command}` timed out after {timeout_secs} seconds")]
    Timeout { command: String, timeout_secs: u64 },

    /// Value of BS_INSTALL_DEPENDENCIES is not recognized
    #[error("BS_INSTALL_DEPENDENCIES value {0} not recognized. Must be one of [yes, no, newenv]")]
    UnknownInstallPreference(String),

    /// environment.yml failed validation
    #[error("Invalid environment spec {path}: {reason}")]
    InvalidEnvironmentSpec { path: String, reason: String },

    /// Lifecycle step requested out of order
    #[error("Environment {env} cannot {action} while {state}")]
    InvalidTransition {
        env: String,
        action: &'static str,
        state: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}
