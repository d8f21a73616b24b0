//! End-to-end handling of a plugin's metadata
//!
//! Generate `metadata.yml` when the plugin has none, validate it, export it
//! as JSON, optionally persist it, and open a pull request for generated
//! files.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{info, instrument};

use super::endpoint::MetadataEndpoint;
use super::generate::generate_metadata;
use super::validate::{find_metadata_file, validate_metadata_file, ALLOWED_PLUGINS};
use crate::domain::DomainPlugin;
use crate::error::{BrainscoreError, Result};
use crate::git::GitClient;
use crate::plugin::PluginType;

pub const VALIDATED_METADATA_FILE: &str = "validated_metadata.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetadataOutcome {
    pub metadata_path: PathBuf,
    /// Whether the metadata file was generated during this run
    pub generated: bool,
    pub validated_path: PathBuf,
    pub persisted: usize,
    pub pr_number: Option<String>,
}

pub struct MetadataHandler {
    domain: Arc<dyn DomainPlugin>,
    endpoint: Option<MetadataEndpoint>,
    git: Option<GitClient>,
    output_dir: PathBuf,
}

impl MetadataHandler {
    pub fn new(domain: Arc<dyn DomainPlugin>) -> Self {
        Self {
            domain,
            endpoint: None,
            git: None,
            output_dir: PathBuf::from("."),
        }
    }

    /// Persist validated metadata through `endpoint`.
    pub fn with_endpoint(mut self, endpoint: MetadataEndpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Open a pull request with `git` whenever metadata was generated.
    pub fn with_git(mut self, git: GitClient) -> Self {
        self.git = Some(git);
        self
    }

    /// Directory receiving `validated_metadata.json`.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    #[instrument(skip(self), fields(plugin_dir = %plugin_dir.display()))]
    pub async fn handle(&self, plugin_dir: &Path, plugin_type: PluginType) -> Result<MetadataOutcome> {
        if !ALLOWED_PLUGINS.contains(&plugin_type) {
            return Err(BrainscoreError::Metadata(format!(
                "Unsupported plugin type: {plugin_type}"
            )));
        }

        let (metadata_path, generated) = match find_metadata_file(plugin_dir) {
            Some(path) => {
                info!(path = %path.display(), "Found metadata file, validating");
                (path, false)
            }
            None => {
                info!("No metadata.yml found, generating");
                let path = generate_metadata(plugin_dir, plugin_type, self.domain.clone())
                    .await?
                    .ok_or_else(|| {
                        BrainscoreError::Metadata(format!(
                            "no metadata could be generated for {}",
                            plugin_dir.display()
                        ))
                    })?;
                (path, true)
            }
        };

        let (errors, data) = validate_metadata_file(&metadata_path);
        if !errors.is_empty() {
            return Err(BrainscoreError::InvalidMetadata { errors });
        }
        let data = data.ok_or_else(|| BrainscoreError::Metadata("metadata is empty".to_string()))?;
        info!("metadata.yml is valid");

        let validated_path = self.output_dir.join(VALIDATED_METADATA_FILE);
        std::fs::write(&validated_path, serde_json::to_vec(&data)?)?;
        info!(path = %validated_path.display(), "Validated metadata saved");

        let persisted = match &self.endpoint {
            Some(endpoint) => endpoint.persist(plugin_type, &data).await?,
            None => 0,
        };

        let pr_number = match (&self.git, generated) {
            (Some(git), true) => Some(git.create_metadata_pr(plugin_dir).await?),
            _ => None,
        };

        Ok(MetadataOutcome {
            metadata_path,
            generated,
            validated_path,
            persisted,
            pr_number,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::testing::StubDomain;
    use conda_env_manager::fakes::RecordingRunner;
    use score_ledger::fakes::MemoryLedger;
    use score_ledger::SubmissionLedger;
    use std::time::Duration;
    use tempfile::tempdir;

    fn plugin_dir(root: &Path) -> PathBuf {
        let dir = root.join("models").join("alexnet");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("__init__.py"), "model_registry['alexnet'] = X\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn existing_metadata_is_validated_and_persisted_without_pr() {
        let root = tempdir().unwrap();
        let dir = plugin_dir(root.path());
        std::fs::write(dir.join("metadata.yml"), "models:\n  alexnet:\n    architecture: DCNN\n").unwrap();
        let ledger = Arc::new(MemoryLedger::new());
        let runner = RecordingRunner::new();

        let handler = MetadataHandler::new(Arc::new(StubDomain::new("vision")))
            .with_endpoint(MetadataEndpoint::new(ledger.clone()))
            .with_git(GitClient::new(Arc::new(runner.clone())))
            .with_output_dir(root.path());
        let outcome = handler.handle(&dir, PluginType::Models).await.unwrap();

        assert!(!outcome.generated);
        assert_eq!(outcome.persisted, 1);
        assert_eq!(outcome.pr_number, None);
        assert!(runner.calls().is_empty());
        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&outcome.validated_path).unwrap()).unwrap();
        assert_eq!(json["models"]["alexnet"]["architecture"], "DCNN");
        assert!(ledger.get_model_metadata("alexnet").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn missing_metadata_is_generated_and_pr_opened() {
        let root = tempdir().unwrap();
        let dir = plugin_dir(root.path());
        let runner = RecordingRunner::new().respond("gh pr view", 0, "7\n");

        let handler = MetadataHandler::new(Arc::new(StubDomain::new("vision")))
            .with_git(GitClient::new(Arc::new(runner.clone())).with_settle_delay(Duration::ZERO))
            .with_output_dir(root.path());
        let outcome = handler.handle(&dir, PluginType::Models).await.unwrap();

        assert!(outcome.generated);
        assert_eq!(outcome.metadata_path, dir.join("metadata.yml"));
        assert_eq!(outcome.pr_number.as_deref(), Some("7"));
    }

    #[tokio::test]
    async fn invalid_metadata_lists_errors() {
        let root = tempdir().unwrap();
        let dir = plugin_dir(root.path());
        std::fs::write(dir.join("metadata.yml"), "models:\n  alexnet:\n    colour: red\n").unwrap();

        let handler = MetadataHandler::new(Arc::new(StubDomain::new("vision")))
            .with_output_dir(root.path());
        match handler.handle(&dir, PluginType::Models).await {
            Err(BrainscoreError::InvalidMetadata { errors }) => assert_eq!(
                errors,
                vec!["Plugin 'alexnet' under 'models' has extra keys: ['colour']"]
            ),
            other => panic!("expected validation failure, got {:?}", other),
        }
        assert!(!root.path().join(VALIDATED_METADATA_FILE).exists());
    }
}
