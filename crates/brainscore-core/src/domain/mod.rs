//! Domain plugins
//!
//! Each Brain-Score domain (vision, language, ...) knows how to load its
//! models and benchmarks, score them and describe them as metadata. The
//! [`DomainRegistry`] maps a domain name to its implementation.

pub mod external;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use score_ledger::MetaFields;
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{BrainscoreError, Result};
use crate::plugin::{scan_registrations, PluginType};
use crate::score::Score;
pub use external::ExternalDomainPlugin;

/// A model as seen from outside its domain library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedModel {
    pub identifier: String,
    #[serde(default)]
    pub bibtex: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

/// A benchmark as seen from outside its domain library.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadedBenchmark {
    pub identifier: String,
    #[serde(default = "default_version")]
    pub version: i64,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub bibtex: Option<String>,
    #[serde(default)]
    pub ceiling: Option<Score>,
}

fn default_version() -> i64 {
    1
}

/// Identifiers registered into `plugin_type`'s registry anywhere below
/// `root`, which may be a domain root or a single plugin directory.
pub fn find_registered(root: &Path, plugin_type: PluginType) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Err(BrainscoreError::MissingPluginDirectory(root.to_path_buf()));
    }
    let registry_name = plugin_type.registry_name();
    let walker = WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            let name = entry.file_name().to_string_lossy();
            entry.depth() == 0 || !(name.starts_with('.') || name.starts_with('_'))
        });

    let mut identifiers = Vec::new();
    for entry in walker {
        let entry = entry.map_err(std::io::Error::from)?;
        if entry.file_type().is_dir() {
            identifiers.extend(scan_registrations(&registry_name, entry.path())?);
        }
    }
    debug!(root = %root.display(), %plugin_type, count = identifiers.len(), "Found registrations");
    Ok(identifiers)
}

/// Domain-specific loading, scoring and metadata extraction.
#[async_trait]
pub trait DomainPlugin: Send + Sync {
    /// Domain name, e.g. `vision`.
    fn domain(&self) -> &str;

    async fn load_model(&self, identifier: &str) -> Result<LoadedModel>;

    async fn load_benchmark(&self, identifier: &str) -> Result<LoadedBenchmark>;

    /// Score `model` on `benchmark`; the result is ceiled when the benchmark
    /// has a ceiling.
    async fn score(&self, model: &str, benchmark: &str) -> Result<Score>;

    async fn find_registered_models(&self, root: &Path) -> Result<Vec<String>> {
        find_registered(root, PluginType::Models)
    }

    async fn find_registered_benchmarks(&self, root: &Path) -> Result<Vec<String>> {
        find_registered(root, PluginType::Benchmarks)
    }

    async fn create_model_metadata(
        &self,
        model: &LoadedModel,
        model_dir_name: &str,
    ) -> Result<MetaFields>;

    async fn create_stimuli_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields>;

    async fn create_data_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields>;

    async fn create_metric_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields>;
}

/// Domain name to plugin mapping. Names are unique.
#[derive(Default, Clone)]
pub struct DomainRegistry {
    plugins: HashMap<String, Arc<dyn DomainPlugin>>,
}

impl std::fmt::Debug for DomainRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainRegistry")
            .field("domains", &self.domains())
            .finish()
    }
}

impl DomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn DomainPlugin>) -> Result<()> {
        let name = plugin.domain().to_string();
        if self.plugins.contains_key(&name) {
            return Err(BrainscoreError::DuplicateDomain(name));
        }
        self.plugins.insert(name, plugin);
        Ok(())
    }

    pub fn get(&self, domain: &str) -> Result<Arc<dyn DomainPlugin>> {
        self.plugins
            .get(domain)
            .cloned()
            .ok_or_else(|| BrainscoreError::UnknownDomain(domain.to_string()))
    }

    /// Registered domain names, sorted.
    pub fn domains(&self) -> Vec<String> {
        let mut names: Vec<String> = self.plugins.keys().cloned().collect();
        names.sort();
        names
    }
}
