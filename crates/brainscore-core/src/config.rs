//! Process-level configuration
//!
//! Resolved once at startup and passed down explicitly; nothing below this
//! module reads the process environment on its own.

use std::path::PathBuf;

use conda_env_manager::{EnvConfig, InstallPreference};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration shared by the CLI, runners and endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainscoreConfig {
    /// Install / isolation settings
    pub env: EnvConfig,

    /// Domain name (`vision`, `language`, ...)
    pub domain: String,

    /// `BRAINSCORE_HOME`: cache root for downloaded artifacts
    pub brainscore_home: Option<PathBuf>,

    /// `BRAINIO_HOME`: cache root for BrainIO data
    pub brainio_home: Option<PathBuf>,

    /// `BSC_DATABASESECRET`: ledger connection string
    pub database_secret: Option<String>,

    /// Python interpreter used to reach domain libraries
    pub python_exe: String,
}

impl Default for BrainscoreConfig {
    fn default() -> Self {
        Self {
            env: EnvConfig::default(),
            domain: "vision".to_string(),
            brainscore_home: None,
            brainio_home: None,
            database_secret: None,
            python_exe: "python".to_string(),
        }
    }
}

impl BrainscoreConfig {
    /// Read configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvConfig::from_lookup(&lookup)?;
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty());

        let defaults = Self::default();
        Ok(Self {
            env,
            domain: non_empty("BS_DOMAIN").unwrap_or(defaults.domain),
            brainscore_home: non_empty("BRAINSCORE_HOME").map(PathBuf::from),
            brainio_home: non_empty("BRAINIO_HOME").map(PathBuf::from),
            database_secret: non_empty("BSC_DATABASESECRET"),
            python_exe: non_empty("BS_PYTHON_EXE").unwrap_or(defaults.python_exe),
        })
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_install_preference(mut self, preference: InstallPreference) -> Self {
        self.env.install_preference = preference;
        self
    }

    pub fn with_database_secret(mut self, secret: impl Into<String>) -> Self {
        self.database_secret = Some(secret.into());
        self
    }

    pub fn with_python_exe(mut self, exe: impl Into<String>) -> Self {
        self.python_exe = exe.into();
        self
    }

    /// Name of the domain library package, e.g. `brainscore_vision`
    pub fn library_name(&self) -> String {
        format!("brainscore_{}", self.domain)
    }
}
