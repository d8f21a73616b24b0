//! Conda-Env-Manager: isolated environments for Brain-Score plugins
//!
//! Creates named conda environments, installs a plugin's declared
//! dependencies into them, runs a single composed command and removes the
//! environment afterwards. Also installs dependencies into the current
//! interpreter when isolation is not requested.
//!
//! ## Key Components
//!
//! - `EnvConfig` / `InstallPreference`: resolved `BS_INSTALL_DEPENDENCIES` and tool settings
//! - `CommandRunner`: process seam (`ProcessRunner`, `fakes::RecordingRunner`)
//! - `CondaEnvironment` / `EnvironmentSession`: lifecycle with guaranteed teardown
//! - `DependencyInstaller`: pip installs in the current interpreter

pub mod command;
pub mod config;
pub mod env_spec;
pub mod environment;
pub mod error;
pub mod fakes;
pub mod installer;

pub use command::{CommandOutput, CommandRunner, CommandSpec, ProcessRunner};
pub use config::{EnvConfig, InstallPreference, DEFAULT_PYTHON_VERSION, INSTALL_PREFERENCE_VAR};
pub use env_spec::{validate_environment_file, EnvironmentSpec, ENVIRONMENT_FILE};
pub use environment::{
    sanitize_env_name, CondaEnvironment, EnvState, EnvironmentRequest, EnvironmentSession,
};
pub use error::EnvError;
pub use installer::{pip_install_args, DependencyInstaller};

/// Result type for conda-env-manager operations
pub type Result<T> = std::result::Result<T, EnvError>;

/// Check whether the configured conda executable can be run
pub async fn is_conda_available(config: &EnvConfig) -> bool {
    let spec = CommandSpec::new(&config.conda_exe).arg("--version");
    matches!(ProcessRunner.run(&spec).await, Ok(output) if output.success())
}
