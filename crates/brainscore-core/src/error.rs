//! Error taxonomy for Brain-Score core operations.

use std::path::PathBuf;

use conda_env_manager::EnvError;
use score_ledger::StorageError;

/// Brain-Score core errors.
///
/// Configuration variants (registrations, directories, plugin types) are
/// never retried.
#[derive(Debug, thiserror::Error)]
pub enum BrainscoreError {
    #[error("No registrations found for {identifier}")]
    NoRegistration { identifier: String },

    #[error("More than one registration found for {identifier}: {dirs:?}")]
    DuplicateRegistration {
        identifier: String,
        dirs: Vec<String>,
    },

    #[error("Plugins directory {0} is not a directory")]
    MissingPluginDirectory(PathBuf),

    #[error("unknown plugin type: {0}")]
    UnknownPluginType(String),

    #[error("invalid registrations manifest {path}: {reason}")]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("invalid changed files: {0}")]
    InvalidChanges(String),

    #[error("invalid score: {0}")]
    InvalidScore(String),

    #[error("score handoff failed at {path}: {reason}")]
    Handoff { path: PathBuf, reason: String },

    #[error("domain plugin '{0}' is already registered")]
    DuplicateDomain(String),

    #[error("unknown domain '{0}'")]
    UnknownDomain(String),

    #[error("domain plugin error: {0}")]
    Domain(String),

    #[error("metadata error: {0}")]
    Metadata(String),

    #[error("metadata validation failed: {}", errors.join("; "))]
    InvalidMetadata { errors: Vec<String> },

    #[error("git error: {0}")]
    GitError(String),

    #[error("environment error: {0}")]
    Env(#[from] EnvError),

    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Brain-Score core operations.
pub type Result<T> = std::result::Result<T, BrainscoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_errors_name_the_identifier() {
        let err = BrainscoreError::NoRegistration {
            identifier: "alexnet".into(),
        };
        assert_eq!(err.to_string(), "No registrations found for alexnet");

        let err = BrainscoreError::DuplicateRegistration {
            identifier: "alexnet".into(),
            dirs: vec!["a".into(), "b".into()],
        };
        assert!(err.to_string().contains("More than one registration found for alexnet"));
    }

    #[test]
    fn env_errors_convert() {
        let err: BrainscoreError = EnvError::UnknownInstallPreference("x".into()).into();
        assert!(matches!(err, BrainscoreError::Env(_)));
    }
}
