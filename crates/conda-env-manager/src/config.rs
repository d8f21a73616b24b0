//! Environment configuration
//!
//! Replaces ad-hoc reads of `BS_INSTALL_DEPENDENCIES` with a value that is
//! resolved once and handed to installers and runners explicitly.

use crate::error::EnvError;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Environment variable selecting the install preference.
pub const INSTALL_PREFERENCE_VAR: &str = "BS_INSTALL_DEPENDENCIES";

/// Python version required inside isolated environments.
pub const DEFAULT_PYTHON_VERSION: &str = "3.11";

/// Where plugin dependencies get installed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InstallPreference {
    /// Install into the current interpreter
    #[default]
    Yes,
    /// Never install
    No,
    /// Install into a freshly created isolated environment
    NewEnv,
}

impl InstallPreference {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallPreference::Yes => "yes",
            InstallPreference::No => "no",
            InstallPreference::NewEnv => "newenv",
        }
    }
}

impl fmt::Display for InstallPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstallPreference {
    type Err = EnvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "yes" => Ok(InstallPreference::Yes),
            "no" => Ok(InstallPreference::No),
            "newenv" => Ok(InstallPreference::NewEnv),
            other => Err(EnvError::UnknownInstallPreference(other.to_string())),
        }
    }
}

/// Settings shared by the installer and the isolated environment runner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvConfig {
    /// Install preference
    pub install_preference: InstallPreference,

    /// conda executable (`conda`, `mamba`, or an absolute path)
    pub conda_exe: String,

    /// pip executable used for in-process installs
    pub pip_exe: String,

    /// Python version for new environments
    pub python_version: String,

    /// Directory holding created environments (exported as CONDA_ENVS_PATH)
    pub envs_dir: Option<PathBuf>,

    /// Timeout in seconds for a single lifecycle command (0 = no timeout)
    pub command_timeout_secs: u64,
}

impl Default for EnvConfig {
    fn default() -> Self {
        Self {
            install_preference: InstallPreference::Yes,
            conda_exe: "conda".to_string(),
            pip_exe: "pip".to_string(),
            python_version: DEFAULT_PYTHON_VERSION.to_string(),
            envs_dir: None,
            command_timeout_secs: 0,
        }
    }
}

impl EnvConfig {
    /// Read configuration from the process environment.
    ///
    /// Unset variables fall back to defaults; an unrecognized install
    /// preference is an error.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(pref) = lookup(INSTALL_PREFERENCE_VAR) {
            config.install_preference = pref.parse()?;
        }
        if let Some(exe) = lookup("BS_CONDA_EXE").filter(|s| !s.is_empty()) {
            config.conda_exe = exe;
        }
        if let Some(exe) = lookup("BS_PIP_EXE").filter(|s| !s.is_empty()) {
            config.pip_exe = exe;
        }
        if let Some(version) = lookup("BS_PYTHON_VERSION").filter(|s| !s.is_empty()) {
            config.python_version = version;
        }
        if let Some(dir) = lookup("BS_ENVS_DIR").filter(|s| !s.is_empty()) {
            config.envs_dir = Some(PathBuf::from(dir));
        }
        Ok(config)
    }

    pub fn with_install_preference(mut self, preference: InstallPreference) -> Self {
        self.install_preference = preference;
        self
    }

    pub fn with_conda_exe(mut self, exe: impl Into<String>) -> Self {
        self.conda_exe = exe.into();
        self
    }

    pub fn with_envs_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.envs_dir = Some(dir.into());
        self
    }

    pub fn with_command_timeout(mut self, secs: u64) -> Self {
        self.command_timeout_secs = secs;
        self
    }
}
