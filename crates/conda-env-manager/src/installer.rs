//! Dependency installation into the current interpreter

use crate::command::{CommandRunner, CommandSpec};
use crate::config::{EnvConfig, InstallPreference};
use crate::Result;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

/// Files that make a directory pip-installable as a package.
pub const BUILD_DESCRIPTORS: [&str; 2] = ["pyproject.toml", "setup.py"];

/// Plain dependency list.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// `pip` argument lists needed to install what `dir` declares.
///
/// A build descriptor yields an editable install of the directory; a
/// requirements file yields `install -r`. Both may apply.
pub fn pip_install_args(dir: &Path) -> Vec<Vec<String>> {
    let mut installs = Vec::new();
    if BUILD_DESCRIPTORS.iter().any(|f| dir.join(f).is_file()) {
        installs.push(vec![
            "install".to_string(),
            "-e".to_string(),
            dir.display().to_string(),
        ]);
    }
    let requirements = dir.join(REQUIREMENTS_FILE);
    if requirements.is_file() {
        installs.push(vec![
            "install".to_string(),
            "-r".to_string(),
            requirements.display().to_string(),
        ]);
    }
    installs
}

/// Installs a located plugin's declared dependencies with `pip`.
#[derive(Clone)]
pub struct DependencyInstaller {
    config: EnvConfig,
    runner: Arc<dyn CommandRunner>,
}

impl DependencyInstaller {
    pub fn new(config: EnvConfig, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    pub fn config(&self) -> &EnvConfig {
        &self.config
    }

    /// Whether the configured preference asks for installs at all.
    pub fn enabled(&self) -> bool {
        self.config.install_preference != InstallPreference::No
    }

    /// Install everything `plugin_dir` declares. Returns the number of pip
    /// invocations; a failing invocation aborts with `CommandFailed`.
    pub async fn install(&self, plugin_dir: &Path) -> Result<usize> {
        let installs = pip_install_args(plugin_dir);
        if installs.is_empty() {
            debug!(plugin_dir = %plugin_dir.display(), "Plugin declares no dependencies");
            return Ok(0);
        }

        for args in &installs {
            let spec = CommandSpec::new(&self.config.pip_exe)
                .args(args.iter().cloned())
                .timeout(self.config.command_timeout_secs);
            info!(command = %spec, "Installing plugin dependencies");
            self.runner.run(&spec).await?.check(&spec)?;
        }
        Ok(installs.len())
    }
}
