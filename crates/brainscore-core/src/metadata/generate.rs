//! Metadata generation through a domain plugin
//!
//! Generated entries are merged into the plugin's `metadata.yml` under the
//! plugin-type section, replacing any previous entry for the same
//! identifier and leaving other entries untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_yaml::{Mapping, Value};
use tracing::{error, info};

use super::validate::METADATA_FILE;
use crate::domain::DomainPlugin;
use crate::error::{BrainscoreError, Result};
use crate::plugin::PluginType;

fn dir_name(plugin_dir: &Path) -> String {
    plugin_dir
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

fn ensure_dir(plugin_dir: &Path) -> Result<()> {
    if !plugin_dir.is_dir() {
        return Err(BrainscoreError::MissingPluginDirectory(plugin_dir.to_path_buf()));
    }
    Ok(())
}

/// Write `entry` as `{section}.{identifier}` into the YAML file at `path`.
pub fn merge_metadata_entry(
    path: &Path,
    section: PluginType,
    identifier: &str,
    entry: Value,
) -> Result<()> {
    let mut document = match std::fs::read_to_string(path) {
        Ok(content) if !content.trim().is_empty() => match serde_yaml::from_str(&content)? {
            Value::Mapping(mapping) => mapping,
            Value::Null => Mapping::new(),
            _ => {
                return Err(BrainscoreError::Metadata(format!(
                    "{} is not a mapping",
                    path.display()
                )))
            }
        },
        Ok(_) => Mapping::new(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Mapping::new(),
        Err(e) => return Err(e.into()),
    };

    let key = Value::String(section.dir_name().to_string());
    let plugins = document
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !plugins.is_mapping() {
        *plugins = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(plugins) = plugins {
        plugins.insert(Value::String(identifier.to_string()), entry);
    }

    std::fs::write(path, serde_yaml::to_string(&document)?)?;
    Ok(())
}

/// Generates `models:` metadata for the identifiers of one model plugin.
pub struct ModelMetadataGenerator {
    plugin_dir: PathBuf,
    domain: Arc<dyn DomainPlugin>,
}

impl ModelMetadataGenerator {
    pub fn new(plugin_dir: impl Into<PathBuf>, domain: Arc<dyn DomainPlugin>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            domain,
        }
    }

    pub async fn find_registered_models(&self) -> Result<Vec<String>> {
        self.domain.find_registered_models(&self.plugin_dir).await
    }

    async fn process(&self, identifier: &str, yaml_path: &Path) -> Result<()> {
        let model = self.domain.load_model(identifier).await?;
        let fields = self
            .domain
            .create_model_metadata(&model, &dir_name(&self.plugin_dir))
            .await?;
        merge_metadata_entry(
            yaml_path,
            PluginType::Models,
            identifier,
            serde_yaml::to_value(&fields)?,
        )
    }

    /// Returns the metadata file path if at least one model was written.
    pub async fn generate(&self, identifiers: &[String]) -> Result<Option<PathBuf>> {
        ensure_dir(&self.plugin_dir)?;
        let yaml_path = self.plugin_dir.join(METADATA_FILE);
        let mut written = 0usize;
        for (i, identifier) in identifiers.iter().enumerate() {
            info!(
                "Generating metadata for model {}/{}: {}",
                i + 1,
                identifiers.len(),
                identifier
            );
            match self.process(identifier, &yaml_path).await {
                Ok(()) => written += 1,
                Err(e) => error!(model = %identifier, error = %e, "Failed to generate metadata"),
            }
        }
        Ok((written > 0).then_some(yaml_path))
    }
}

/// Generates `benchmarks:` metadata (stimulus set, data and metric) for the
/// identifiers of one benchmark plugin.
pub struct BenchmarkMetadataGenerator {
    plugin_dir: PathBuf,
    domain: Arc<dyn DomainPlugin>,
}

impl BenchmarkMetadataGenerator {
    pub fn new(plugin_dir: impl Into<PathBuf>, domain: Arc<dyn DomainPlugin>) -> Self {
        Self {
            plugin_dir: plugin_dir.into(),
            domain,
        }
    }

    pub async fn find_registered_benchmarks(&self) -> Result<Vec<String>> {
        self.domain.find_registered_benchmarks(&self.plugin_dir).await
    }

    async fn process(&self, identifier: &str, yaml_path: &Path) -> Result<()> {
        let benchmark = self.domain.load_benchmark(identifier).await?;
        let dir = dir_name(&self.plugin_dir);
        let mut entry = Mapping::new();
        entry.insert(
            "stimulus_set".into(),
            serde_yaml::to_value(self.domain.create_stimuli_metadata(&benchmark, &dir).await?)?,
        );
        entry.insert(
            "data".into(),
            serde_yaml::to_value(self.domain.create_data_metadata(&benchmark, &dir).await?)?,
        );
        entry.insert(
            "metric".into(),
            serde_yaml::to_value(self.domain.create_metric_metadata(&benchmark, &dir).await?)?,
        );
        merge_metadata_entry(
            yaml_path,
            PluginType::Benchmarks,
            identifier,
            Value::Mapping(entry),
        )
    }

    /// Returns the metadata file path if at least one benchmark was written.
    pub async fn generate(&self, identifiers: &[String]) -> Result<Option<PathBuf>> {
        ensure_dir(&self.plugin_dir)?;
        let yaml_path = self.plugin_dir.join(METADATA_FILE);
        let mut written = 0usize;
        for (i, identifier) in identifiers.iter().enumerate() {
            info!(
                "Generating metadata for benchmark {}/{}: {}",
                i + 1,
                identifiers.len(),
                identifier
            );
            match self.process(identifier, &yaml_path).await {
                Ok(()) => written += 1,
                Err(e) => error!(benchmark = %identifier, error = %e, "Failed to generate metadata"),
            }
        }
        Ok((written > 0).then_some(yaml_path))
    }
}

/// Discover and generate metadata for every registration in `plugin_dir`.
pub async fn generate_metadata(
    plugin_dir: &Path,
    plugin_type: PluginType,
    domain: Arc<dyn DomainPlugin>,
) -> Result<Option<PathBuf>> {
    let path = match plugin_type {
        PluginType::Models => {
            let generator = ModelMetadataGenerator::new(plugin_dir, domain);
            let models = generator.find_registered_models().await?;
            generator.generate(&models).await?
        }
        PluginType::Benchmarks => {
            let generator = BenchmarkMetadataGenerator::new(plugin_dir, domain);
            let benchmarks = generator.find_registered_benchmarks().await?;
            generator.generate(&benchmarks).await?
        }
        other => {
            return Err(BrainscoreError::Metadata(format!(
                "Unsupported plugin type: {other}"
            )))
        }
    };
    info!(%plugin_type, path = ?path, "Generated metadata");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::StubDomain;
    use crate::metadata::validate::validate_metadata_file;
    use tempfile::tempdir;

    fn model_plugin(root: &Path) -> PathBuf {
        let dir = root.join("models").join("alexnet");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("__init__.py"),
            "model_registry['alexnet'] = A\nmodel_registry['alexnet-broken'] = B\n",
        )
        .unwrap();
        dir
    }

    #[tokio::test]
    async fn model_failures_are_skipped() {
        let root = tempdir().unwrap();
        let dir = model_plugin(root.path());
        let domain = Arc::new(StubDomain::new("vision").failing_on("alexnet-broken"));

        let path = generate_metadata(&dir, PluginType::Models, domain)
            .await
            .unwrap()
            .unwrap();
        let (errors, data) = validate_metadata_file(&path);
        assert!(errors.is_empty(), "{errors:?}");
        let models = data.unwrap()["models"].as_mapping().unwrap().clone();
        assert_eq!(models.len(), 1);
        assert_eq!(models["alexnet"]["architecture"], Value::from("DCNN"));
    }

    #[tokio::test]
    async fn merge_keeps_other_entries_and_is_idempotent() {
        let root = tempdir().unwrap();
        let dir = model_plugin(root.path());
        std::fs::write(
            dir.join(METADATA_FILE),
            "models:\n  hand-written:\n    architecture: RNN\n",
        )
        .unwrap();
        let domain: Arc<dyn DomainPlugin> = Arc::new(StubDomain::new("vision"));
        let generator = ModelMetadataGenerator::new(&dir, domain);
        let ids = vec!["alexnet".to_string()];

        generator.generate(&ids).await.unwrap();
        let first = std::fs::read_to_string(dir.join(METADATA_FILE)).unwrap();
        generator.generate(&ids).await.unwrap();
        let second = std::fs::read_to_string(dir.join(METADATA_FILE)).unwrap();

        assert_eq!(first, second);
        assert!(first.contains("hand-written"));
        assert!(first.contains("alexnet"));
    }

    #[tokio::test]
    async fn benchmark_entries_have_three_sections() {
        let root = tempdir().unwrap();
        let dir = root.path().join("benchmarks").join("majajhong2015");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("__init__.py"),
            "benchmark_registry['MajajHong2015.IT-pls'] = X\n",
        )
        .unwrap();

        let path = generate_metadata(&dir, PluginType::Benchmarks, Arc::new(StubDomain::new("vision")))
            .await
            .unwrap()
            .unwrap();
        let (errors, data) = validate_metadata_file(&path);
        assert!(errors.is_empty(), "{errors:?}");
        let entry = data.unwrap()["benchmarks"]["MajajHong2015.IT-pls"].clone();
        assert_eq!(entry["stimulus_set"]["num_stimuli"], Value::from(3200));
        assert_eq!(entry["data"]["region"], Value::from("IT"));
        assert_eq!(entry["metric"]["type"], Value::from("pls"));
    }

    #[tokio::test]
    async fn nothing_written_returns_none() {
        let root = tempdir().unwrap();
        let dir = model_plugin(root.path());
        let generator = ModelMetadataGenerator::new(&dir, Arc::new(StubDomain::new("vision").failing_on("alexnet")));
        assert!(generator
            .generate(&["alexnet".to_string()])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn unsupported_type_is_rejected() {
        let root = tempdir().unwrap();
        let result =
            generate_metadata(root.path(), PluginType::Metrics, Arc::new(StubDomain::new("vision"))).await;
        assert!(matches!(result, Err(BrainscoreError::Metadata(_))));
    }
}
