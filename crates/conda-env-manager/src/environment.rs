//! Isolated conda environment lifecycle
//!
//! `CondaEnvironment` walks `Created -> DependenciesInstalled ->
//! CommandExecuted -> TornDown`. [`EnvironmentSession::run_scoped`] drives
//! one full lifecycle and tears down on every exit path; dropping an
//! environment that was created but not torn down removes it synchronously.

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::config::EnvConfig;
use crate::error::EnvError;
use crate::installer::pip_install_args;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Lifecycle state of an isolated environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EnvState {
    /// Not yet created
    Pending,
    Created,
    DependenciesInstalled,
    CommandExecuted,
    TornDown,
}

impl fmt::Display for EnvState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EnvState::Pending => "pending",
            EnvState::Created => "created",
            EnvState::DependenciesInstalled => "dependencies-installed",
            EnvState::CommandExecuted => "command-executed",
            EnvState::TornDown => "torn-down",
        };
        f.write_str(s)
    }
}

/// Map an arbitrary identifier to a valid conda environment name.
///
/// Characters outside `[A-Za-z0-9_.-]` become `_`.
pub fn sanitize_env_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "env".to_string()
    } else {
        sanitized
    }
}

/// A named conda environment owned by a single runner.
pub struct CondaEnvironment {
    name: String,
    config: EnvConfig,
    runner: Arc<dyn CommandRunner>,
    state: EnvState,
}

impl fmt::Debug for CondaEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CondaEnvironment")
            .field("name", &self.name)
            .field("state", &self.state)
            .finish()
    }
}

impl CondaEnvironment {
    pub fn new(name: &str, config: EnvConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            name: sanitize_env_name(name),
            config,
            runner,
            state: EnvState::Pending,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> EnvState {
        self.state
    }

    fn conda(&self) -> CommandSpec {
        let mut spec =
            CommandSpec::new(&self.config.conda_exe).timeout(self.config.command_timeout_secs);
        if let Some(dir) = &self.config.envs_dir {
            spec = spec.env("CONDA_ENVS_PATH", dir.display().to_string());
        }
        spec
    }

    fn remove_command(&self) -> CommandSpec {
        self.conda()
            .args(["env", "remove", "-n", self.name.as_str(), "-y"])
    }

    fn in_env(&self) -> CommandSpec {
        self.conda()
            .args(["run", "-n", self.name.as_str(), "--no-capture-output"])
    }

    fn expect_state(&self, allowed: &[EnvState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(EnvError::InvalidTransition {
                env: self.name.clone(),
                action,
                state: self.state.to_string(),
            })
        }
    }

    /// Create the environment, replacing any stale one of the same name.
    ///
    /// With an `environment.yml` the environment is updated from it after
    /// creation.
    pub async fn create(&mut self, environment_file: Option<&Path>) -> Result<()> {
        self.expect_state(&[EnvState::Pending], "create")?;

        let stale = self.remove_command();
        let removed = self.runner.run(&stale).await?;
        debug!(env = %self.name, return_code = removed.return_code, "Removed stale environment");

        let python = format!("python={}", self.config.python_version);
        let create = self
            .conda()
            .args(["create", "-n", self.name.as_str(), python.as_str(), "-y"]);
        info!(env = %self.name, "Creating environment");
        self.runner.run(&create).await?.check(&create)?;
        self.state = EnvState::Created;

        if let Some(file) = environment_file {
            let update = self.conda().args([
                "env".to_string(),
                "update".to_string(),
                "-n".to_string(),
                self.name.clone(),
                "--file".to_string(),
                file.display().to_string(),
            ]);
            info!(env = %self.name, file = %file.display(), "Applying environment spec");
            self.runner.run(&update).await?.check(&update)?;
        }
        Ok(())
    }

    /// pip-install every given directory's declared dependencies inside the
    /// environment.
    pub async fn install_dependencies(&mut self, dirs: &[PathBuf]) -> Result<()> {
        self.expect_state(&[EnvState::Created], "install dependencies")?;

        for dir in dirs {
            for args in pip_install_args(dir) {
                let spec = self
                    .in_env()
                    .args(["python", "-m", "pip"])
                    .args(args);
                info!(env = %self.name, command = %spec, "Installing dependencies");
                self.runner.run(&spec).await?.check(&spec)?;
            }
        }
        self.state = EnvState::DependenciesInstalled;
        Ok(())
    }

    /// Run one composed shell command inside the environment. The return
    /// code is reported, not interpreted.
    pub async fn execute(
        &mut self,
        script: &str,
        envs: &[(String, String)],
        current_dir: Option<&Path>,
    ) -> Result<CommandOutput> {
        self.expect_state(&[EnvState::DependenciesInstalled], "execute")?;

        let mut spec = self.in_env().args(["bash", "-c", script]);
        for (key, value) in envs {
            spec = spec.env(key.as_str(), value.as_str());
        }
        if let Some(dir) = current_dir {
            spec = spec.current_dir(dir);
        }

        info!(env = %self.name, "Executing command in environment");
        let output = self.runner.run(&spec).await?;
        self.state = EnvState::CommandExecuted;
        info!(env = %self.name, return_code = output.return_code, "Command completed");
        Ok(output)
    }

    /// Remove the environment. Idempotent.
    pub async fn teardown(&mut self) -> Result<()> {
        match self.state {
            EnvState::TornDown => return Ok(()),
            EnvState::Pending => {
                self.state = EnvState::TornDown;
                return Ok(());
            }
            _ => {}
        }

        let spec = self.remove_command();
        info!(env = %self.name, "Tearing down environment");
        // Marked torn down even on failure so Drop does not retry.
        self.state = EnvState::TornDown;
        self.runner.run(&spec).await?.check(&spec)?;
        Ok(())
    }
}

impl Drop for CondaEnvironment {
    fn drop(&mut self) {
        if matches!(self.state, EnvState::Pending | EnvState::TornDown) {
            return;
        }
        warn!(env = %self.name, state = %self.state, "Environment dropped without teardown, removing");
        let spec = self.remove_command();
        if let Err(e) = self.runner.run_blocking(&spec) {
            warn!(env = %self.name, error = %e, "Best-effort teardown failed");
        }
        self.state = EnvState::TornDown;
    }
}

/// What to run in a fresh environment.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentRequest {
    pub env_name: String,
    /// Optional `environment.yml` applied after creation
    pub environment_file: Option<PathBuf>,
    /// Directories whose declared dependencies get installed, in order
    pub install_dirs: Vec<PathBuf>,
    /// Composed shell command
    pub script: String,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
}

impl EnvironmentRequest {
    pub fn new(env_name: impl Into<String>, script: impl Into<String>) -> Self {
        Self {
            env_name: env_name.into(),
            script: script.into(),
            ..Default::default()
        }
    }

    pub fn environment_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.environment_file = Some(file.into());
        self
    }

    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dirs.push(dir.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }
}

/// Runs requests in isolated environments with guaranteed teardown.
#[derive(Clone)]
pub struct EnvironmentSession {
    config: EnvConfig,
    runner: Arc<dyn CommandRunner>,
}

impl EnvironmentSession {
    pub fn new(config: EnvConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    pub fn runner(&self) -> Arc<dyn CommandRunner> {
        self.runner.clone()
    }

    /// Create, install, execute and tear down.
    ///
    /// A failure before execution is returned after teardown; a teardown
    /// failure after a completed command is logged and the command's output
    /// is still returned.
    pub async fn run_scoped(&self, request: &EnvironmentRequest) -> Result<CommandOutput> {
        let mut env =
            CondaEnvironment::new(&request.env_name, self.config.clone(), self.runner.clone());

        let outcome = async {
            env.create(request.environment_file.as_deref()).await?;
            env.install_dependencies(&request.install_dirs).await?;
            env.execute(&request.script, &request.envs, request.current_dir.as_deref())
                .await
        }
        .await;

        let teardown = env.teardown().await;
        match (outcome, teardown) {
            (Ok(output), Ok(())) => Ok(output),
            (Ok(output), Err(e)) => {
                warn!(env = %env.name(), error = %e, "Teardown failed after command completed");
                Ok(output)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!(env = %env.name(), error = %teardown_err, "Teardown failed after error");
                Err(e)
            }
        }
    }
}
