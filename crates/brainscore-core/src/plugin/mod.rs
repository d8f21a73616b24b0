//! Plugin types, registration lookup and import
//!
//! A plugin library (e.g. `brainscore_vision`) keeps each plugin type in its
//! own directory: `models/`, `benchmarks/`, `data/`, `metrics/`. Each
//! subdirectory is one plugin which registers one or more identifiers.

pub mod locator;
pub mod registrations;

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use conda_env_manager::{CommandRunner, DependencyInstaller, EnvConfig};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::error::{BrainscoreError, Result};
pub use locator::PluginLocator;
pub use registrations::{registered_identifiers, scan_registrations};

/// The four kinds of plugin a Brain-Score library hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginType {
    Models,
    Benchmarks,
    Data,
    Metrics,
}

impl PluginType {
    pub const ALL: [PluginType; 4] = [
        PluginType::Models,
        PluginType::Benchmarks,
        PluginType::Data,
        PluginType::Metrics,
    ];

    pub fn dir_name(&self) -> &'static str {
        match self {
            PluginType::Models => "models",
            PluginType::Benchmarks => "benchmarks",
            PluginType::Data => "data",
            PluginType::Metrics => "metrics",
        }
    }

    pub fn singular(&self) -> &'static str {
        match self {
            PluginType::Models => "model",
            PluginType::Benchmarks => "benchmark",
            PluginType::Data => "data",
            PluginType::Metrics => "metric",
        }
    }

    pub fn registry_name(&self) -> String {
        format!("{}_registry", self.singular())
    }

    pub fn helpers_dir(&self) -> String {
        format!("{}_helpers", self.singular())
    }
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

impl FromStr for PluginType {
    type Err = BrainscoreError;

    fn from_str(s: &str) -> Result<Self> {
        PluginType::ALL
            .into_iter()
            .find(|t| t.dir_name() == s)
            .ok_or_else(|| BrainscoreError::UnknownPluginType(s.to_string()))
    }
}

/// A resolved plugin directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginHandle {
    pub plugin_type: PluginType,
    pub dirname: String,
    pub path: PathBuf,
}

/// Locate the plugin registering `identifier` and install its dependencies
/// into the current interpreter unless the install preference is `no`.
#[instrument(skip(config, runner), fields(library = %library_dir.display()))]
pub async fn import_plugin(
    config: &EnvConfig,
    runner: Arc<dyn CommandRunner>,
    library_dir: &Path,
    plugin_type: PluginType,
    identifier: &str,
) -> Result<PluginHandle> {
    let locator = PluginLocator::new(library_dir, plugin_type.dir_name())?;
    let dirname = locator.locate(identifier)?;
    let path = locator.plugins_dir().join(&dirname);

    let installer = DependencyInstaller::new(config.clone(), runner);
    if installer.enabled() {
        let installs = installer.install(&path).await?;
        info!(identifier, dirname = %dirname, installs, "Imported plugin");
    } else {
        info!(identifier, dirname = %dirname, "Imported plugin without installing dependencies");
    }

    Ok(PluginHandle {
        plugin_type,
        dirname,
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conda_env_manager::fakes::RecordingRunner;
    use conda_env_manager::InstallPreference;
    use tempfile::tempdir;

    #[test]
    fn plugin_type_names() {
        assert_eq!(PluginType::Metrics.singular(), "metric");
        assert_eq!(PluginType::Data.registry_name(), "data_registry");
        assert_eq!(PluginType::Models.helpers_dir(), "model_helpers");
        assert_eq!("benchmarks".parse::<PluginType>().unwrap(), PluginType::Benchmarks);
        assert!("benchmark".parse::<PluginType>().is_err());
    }

    fn library_with_requirements() -> tempfile::TempDir {
        let root = tempdir().unwrap();
        let plugin = root.path().join("models").join("alexnet");
        std::fs::create_dir_all(&plugin).unwrap();
        std::fs::write(plugin.join("__init__.py"), "model_registry['alexnet'] = X\n").unwrap();
        std::fs::write(plugin.join("requirements.txt"), "torch\n").unwrap();
        root
    }

    #[tokio::test]
    async fn import_installs_requirements() {
        let root = library_with_requirements();
        let runner = RecordingRunner::new();
        let handle = import_plugin(
            &EnvConfig::default(),
            Arc::new(runner.clone()),
            root.path(),
            PluginType::Models,
            "alexnet",
        )
        .await
        .unwrap();

        assert_eq!(handle.dirname, "alexnet");
        assert_eq!(handle.path, root.path().join("models").join("alexnet"));
        assert_eq!(runner.count_matching("install -r"), 1);
    }

    #[tokio::test]
    async fn import_skips_install_when_disabled() {
        let root = library_with_requirements();
        let runner = RecordingRunner::new();
        let config = EnvConfig::default().with_install_preference(InstallPreference::No);
        import_plugin(&config, Arc::new(runner.clone()), root.path(), PluginType::Models, "alexnet")
            .await
            .unwrap();
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn import_propagates_install_failure() {
        let root = library_with_requirements();
        let runner = RecordingRunner::new().fail_on("install -r", 1);
        let result = import_plugin(
            &EnvConfig::default(),
            Arc::new(runner),
            root.path(),
            PluginType::Models,
            "alexnet",
        )
        .await;
        assert!(matches!(result, Err(BrainscoreError::Env(_))));
    }
}
