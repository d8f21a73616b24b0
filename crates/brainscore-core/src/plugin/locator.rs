//! Locate the directory that registers an identifier
//!
//! Read-only scan of the immediate subdirectories of a plugin-type
//! directory. Exactly one directory may register a given identifier.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::registrations::{load_manifest, registers, INIT_FILE};
use crate::error::{BrainscoreError, Result};

/// Resolves identifiers within one plugin-type directory, e.g.
/// `brainscore_vision/models`.
#[derive(Debug, Clone)]
pub struct PluginLocator {
    plugins_dir: PathBuf,
    registry_name: String,
}

impl PluginLocator {
    /// Fails if `library_dir/plugin_type_dir` is not a directory.
    pub fn new(library_dir: &Path, plugin_type_dir: &str) -> Result<Self> {
        let plugins_dir = library_dir.join(plugin_type_dir);
        if !plugins_dir.is_dir() {
            return Err(BrainscoreError::MissingPluginDirectory(plugins_dir));
        }
        // "models" -> "model_registry"
        let registry_name = format!("{}_registry", plugin_type_dir.trim_matches('s'));
        Ok(Self {
            plugins_dir,
            registry_name,
        })
    }

    pub fn with_registry_name(mut self, registry_name: impl Into<String>) -> Self {
        self.registry_name = registry_name.into();
        self
    }

    pub fn plugins_dir(&self) -> &Path {
        &self.plugins_dir
    }

    pub fn registry_name(&self) -> &str {
        &self.registry_name
    }

    /// Candidate plugin directory names, sorted, skipping `.`/`_` prefixes.
    pub fn plugin_dirnames(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.plugins_dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') || name.starts_with('_') {
                continue;
            }
            names.push(name);
        }
        names.sort();
        Ok(names)
    }

    fn dir_registers(&self, dirname: &str, identifier: &str) -> Result<bool> {
        let plugin_dir = self.plugins_dir.join(dirname);
        if let Some(identifiers) = load_manifest(&plugin_dir)? {
            return Ok(identifiers.iter().any(|id| id == identifier));
        }
        let init_file = plugin_dir.join(INIT_FILE);
        if !init_file.is_file() {
            return Ok(false);
        }
        let source = std::fs::read_to_string(&init_file)?;
        Ok(registers(&self.registry_name, identifier, &source))
    }

    /// Name of the single directory registering `identifier`.
    pub fn locate(&self, identifier: &str) -> Result<String> {
        let mut matches = Vec::new();
        for dirname in self.plugin_dirnames()? {
            if self.dir_registers(&dirname, identifier)? {
                matches.push(dirname);
            }
        }

        match matches.len() {
            0 => Err(BrainscoreError::NoRegistration {
                identifier: identifier.to_string(),
            }),
            1 => {
                let dirname = matches.remove(0);
                debug!(identifier, dirname = %dirname, "Located plugin");
                Ok(dirname)
            }
            _ => Err(BrainscoreError::DuplicateRegistration {
                identifier: identifier.to_string(),
                dirs: matches,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_plugin(root: &Path, kind: &str, dirname: &str, init: &str) {
        let dir = root.join(kind).join(dirname);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(INIT_FILE), init).unwrap();
    }

    #[test]
    fn missing_type_dir_is_an_error() {
        let root = tempdir().unwrap();
        assert!(matches!(
            PluginLocator::new(root.path(), "models"),
            Err(BrainscoreError::MissingPluginDirectory(_))
        ));
    }

    #[test]
    fn locates_single_registration() {
        let root = tempdir().unwrap();
        write_plugin(root.path(), "benchmarks", "futrell2018", "benchmark_registry['Futrell2018-pearsonr'] = X\n");
        write_plugin(root.path(), "benchmarks", "pereira2018", "benchmark_registry[\"Pereira2018.243sentences-linear\"] = Y\n");

        let locator = PluginLocator::new(root.path(), "benchmarks").unwrap();
        assert_eq!(locator.registry_name(), "benchmark_registry");
        assert_eq!(locator.locate("Futrell2018-pearsonr").unwrap(), "futrell2018");
        assert_eq!(
            locator.locate("Pereira2018.243sentences-linear").unwrap(),
            "pereira2018"
        );
    }

    #[test]
    fn zero_registrations_is_an_error() {
        let root = tempdir().unwrap();
        write_plugin(root.path(), "models", "alexnet", "model_registry['alexnet'] = X\n");
        let locator = PluginLocator::new(root.path(), "models").unwrap();
        assert!(matches!(
            locator.locate("resnet"),
            Err(BrainscoreError::NoRegistration { .. })
        ));
    }

    #[test]
    fn duplicate_registrations_is_an_error() {
        let root = tempdir().unwrap();
        write_plugin(root.path(), "models", "a", "model_registry['dup'] = X\n");
        write_plugin(root.path(), "models", "b", "model_registry['dup'] = Y\n");
        let locator = PluginLocator::new(root.path(), "models").unwrap();
        match locator.locate("dup") {
            Err(BrainscoreError::DuplicateRegistration { dirs, .. }) => {
                assert_eq!(dirs, vec!["a".to_string(), "b".to_string()])
            }
            other => panic!("expected duplicate registration, got {:?}", other),
        }
    }

    #[test]
    fn skips_hidden_and_private_dirs_and_missing_init() {
        let root = tempdir().unwrap();
        write_plugin(root.path(), "models", "__pycache__", "model_registry['x'] = X\n");
        write_plugin(root.path(), "models", ".hidden", "model_registry['x'] = X\n");
        std::fs::create_dir_all(root.path().join("models").join("no_init")).unwrap();
        write_plugin(root.path(), "models", "real", "model_registry['x'] = X\n");

        let locator = PluginLocator::new(root.path(), "models").unwrap();
        assert_eq!(locator.plugin_dirnames().unwrap(), vec!["no_init", "real"]);
        assert_eq!(locator.locate("x").unwrap(), "real");
    }

    #[test]
    fn registry_name_override() {
        let root = tempdir().unwrap();
        write_plugin(root.path(), "models", "custom", "custom_registry['m'] = X\n");
        let locator = PluginLocator::new(root.path(), "models")
            .unwrap()
            .with_registry_name("custom_registry");
        assert_eq!(locator.locate("m").unwrap(), "custom");
    }
}
