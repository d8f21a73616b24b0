//! `environment.yml` validation
//!
//! A plugin may ship a conda environment spec. It must not name the
//! environment (the runner assigns names) and may pin python at most once,
//! to a version compatible with the configured one.

use crate::error::EnvError;
use crate::Result;
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const ENVIRONMENT_FILE: &str = "environment.yml";

/// Parsed conda environment spec of a plugin directory.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    pub path: PathBuf,
    /// Top-level `name` value, if declared
    pub name: Option<String>,
    /// Every `python=<version>` dependency, version part only
    pub python_specs: Vec<String>,
}

impl EnvironmentSpec {
    /// Load `environment.yml` from `plugin_dir`; `Ok(None)` when absent.
    pub fn load(plugin_dir: &Path) -> Result<Option<Self>> {
        let path = plugin_dir.join(ENVIRONMENT_FILE);
        if !path.is_file() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&path, &content).map(Some)
    }

    pub fn parse(path: &Path, content: &str) -> Result<Self> {
        let value: Value =
            serde_yaml::from_str(content).map_err(|e| EnvError::InvalidEnvironmentSpec {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

        let name = match &value {
            Value::Mapping(map) => map.get("name").map(|v| match v {
                Value::String(s) => s.clone(),
                other => format!("{:?}", other),
            }),
            _ => None,
        };

        let mut python_specs = Vec::new();
        collect_python_specs(&value, &mut python_specs);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            python_specs,
        })
    }

    /// Check the spec against the python version new environments use.
    pub fn validate(&self, python_version: &str) -> Result<()> {
        let invalid = |reason: String| EnvError::InvalidEnvironmentSpec {
            path: self.path.display().to_string(),
            reason,
        };

        if self.name.is_some() {
            return Err(invalid("environment.yml must not specify 'name'".to_string()));
        }

        match self.python_specs.as_slice() {
            [] => {
                debug!(path = %self.path.display(), "No python pin in environment spec");
                Ok(())
            }
            [version] if version.starts_with(python_version) => Ok(()),
            [version] => Err(invalid(format!(
                "python={} is not supported, expected python={}",
                version, python_version
            ))),
            _ => Err(invalid(
                "multiple versions of python found in environment.yml".to_string(),
            )),
        }
    }
}

fn collect_python_specs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => {
            if let Some((_, version)) = s.split_once("python=") {
                out.push(version.trim().to_string());
            }
        }
        Value::Sequence(items) => items.iter().for_each(|v| collect_python_specs(v, out)),
        Value::Mapping(map) => map.values().for_each(|v| collect_python_specs(v, out)),
        _ => {}
    }
}

/// Load and validate `environment.yml` in one step (no-op when absent).
pub fn validate_environment_file(plugin_dir: &Path, python_version: &str) -> Result<()> {
    match EnvironmentSpec::load(plugin_dir)? {
        Some(spec) => spec.validate(python_version),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn parse(content: &str) -> EnvironmentSpec {
        EnvironmentSpec::parse(Path::new("environment.yml"), content).unwrap()
    }

    #[test]
    fn test_single_matching_python_pin_is_valid() {
        let spec = parse("channels:\n  - conda-forge\ndependencies:\n  - python=3.11.4\n  - numpy\n");
        assert_eq!(spec.python_specs, vec!["3.11.4".to_string()]);
        assert!(spec.validate("3.11").is_ok());
    }

    #[test]
    fn test_no_python_pin_is_valid() {
        let spec = parse("dependencies:\n  - numpy\n  - pip:\n    - torch\n");
        assert!(spec.python_specs.is_empty());
        assert!(spec.validate("3.11").is_ok());
    }

    #[test]
    fn test_name_is_rejected() {
        let spec = parse("name: my_env\ndependencies:\n  - numpy\n");
        let err = spec.validate("3.11").unwrap_err();
        assert!(err.to_string().contains("must not specify 'name'"));
    }

    #[test]
    fn test_wrong_python_version_is_rejected() {
        let spec = parse("dependencies:\n  - python=3.8\n");
        assert!(spec.validate("3.11").is_err());
    }

    #[test]
    fn test_multiple_python_pins_are_rejected() {
        let spec = parse("dependencies:\n  - python=3.11\n  - pip:\n    - python=3.11\n");
        let err = spec.validate("3.11").unwrap_err();
        assert!(err.to_string().contains("multiple versions of python"));
    }

    #[test]
    fn test_missing_file_is_ok() {
        let dir = tempdir().unwrap();
        assert!(validate_environment_file(dir.path(), "3.11").is_ok());
    }

    #[test]
    fn test_malformed_file_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(ENVIRONMENT_FILE), "dependencies: [unclosed\n").unwrap();
        let err = validate_environment_file(dir.path(), "3.11").unwrap_err();
        assert!(matches!(err, EnvError::InvalidEnvironmentSpec { .. }));
    }
}
