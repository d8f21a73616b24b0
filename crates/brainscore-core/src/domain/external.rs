//! Domain plugin backed by the domain library's own command-line entry point
//!
//! Every operation runs `{python} -m brainscore_{domain}.plugin_management
//! <op> <args...>` and reads a JSON document from the last non-empty line of
//! stdout. Scores travel through a [`ScoreHandoff`] file instead.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use conda_env_manager::{CommandRunner, CommandSpec};
use score_ledger::MetaFields;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use super::{DomainPlugin, LoadedBenchmark, LoadedModel};
use crate::config::BrainscoreConfig;
use crate::error::{BrainscoreError, Result};
use crate::score::{Score, ScoreHandoff, SCORE_PATH_VAR};

const ENTRY_MODULE: &str = "plugin_management";

#[derive(Clone)]
pub struct ExternalDomainPlugin {
    domain: String,
    python_exe: String,
    working_dir: Option<PathBuf>,
    scratch_dir: PathBuf,
    timeout_secs: u64,
    runner: Arc<dyn CommandRunner>,
}

impl std::fmt::Debug for ExternalDomainPlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExternalDomainPlugin")
            .field("domain", &self.domain)
            .field("python_exe", &self.python_exe)
            .field("working_dir", &self.working_dir)
            .finish_non_exhaustive()
    }
}

impl ExternalDomainPlugin {
    pub fn new(domain: impl Into<String>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            domain: domain.into(),
            python_exe: "python".to_string(),
            working_dir: None,
            scratch_dir: std::env::temp_dir(),
            timeout_secs: conda_env_manager::EnvConfig::default().command_timeout_secs,
            runner,
        }
    }

    pub fn from_config(config: &BrainscoreConfig, runner: Arc<dyn CommandRunner>) -> Self {
        let mut plugin = Self::new(config.domain.clone(), runner)
            .with_python_exe(config.python_exe.clone())
            .with_timeout(config.env.command_timeout_secs);
        if let Some(home) = &config.brainscore_home {
            plugin = plugin.with_working_dir(home.clone());
        }
        plugin
    }

    pub fn with_python_exe(mut self, exe: impl Into<String>) -> Self {
        self.python_exe = exe.into();
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    /// Directory holding score handoff files.
    pub fn with_scratch_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = dir.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    fn module(&self) -> String {
        format!("brainscore_{}.{}", self.domain, ENTRY_MODULE)
    }

    fn command(&self, op: &str, args: &[&str]) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.python_exe)
            .arg("-m")
            .arg(self.module())
            .arg(op)
            .args(args.iter().copied())
            .timeout(self.timeout_secs);
        if let Some(dir) = &self.working_dir {
            spec = spec.current_dir(dir.clone());
        }
        spec
    }

    async fn invoke(&self, spec: CommandSpec) -> Result<String> {
        debug!(command = %spec, "Invoking domain library");
        let output = self.runner.run(&spec).await?.check(&spec)?;
        Ok(output.stdout)
    }

    async fn call<T: DeserializeOwned>(&self, op: &str, args: &[&str]) -> Result<T> {
        let stdout = self.invoke(self.command(op, args)).await?;
        let line = stdout
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| BrainscoreError::Domain(format!("'{op}' produced no output")))?;
        serde_json::from_str(line.trim()).map_err(|e| {
            BrainscoreError::Domain(format!("'{op}' produced invalid JSON: {e}"))
        })
    }

    async fn benchmark_meta(
        &self,
        op: &str,
        benchmark: &LoadedBenchmark,
        dir_name: &str,
    ) -> Result<MetaFields> {
        self.call(op, &[&benchmark.identifier, dir_name]).await
    }
}

#[async_trait]
impl DomainPlugin for ExternalDomainPlugin {
    fn domain(&self) -> &str {
        &self.domain
    }

    async fn load_model(&self, identifier: &str) -> Result<LoadedModel> {
        self.call("load-model", &[identifier]).await
    }

    async fn load_benchmark(&self, identifier: &str) -> Result<LoadedBenchmark> {
        self.call("load-benchmark", &[identifier]).await
    }

    async fn score(&self, model: &str, benchmark: &str) -> Result<Score> {
        let library = self.scratch_dir.join(format!("brainscore_{}", self.domain));
        let handoff = ScoreHandoff::new(&library, &format!("{model}_{benchmark}"));
        let spec = self
            .command("score", &[model, benchmark])
            .env(SCORE_PATH_VAR, handoff.path().display().to_string());

        info!(model, benchmark, domain = %self.domain, "Scoring through domain library");
        let result = self.invoke(spec).await;
        if let Err(e) = result {
            if handoff.path().exists() {
                if let Err(remove_err) = std::fs::remove_file(handoff.path()) {
                    warn!(
                        path = %handoff.path().display(),
                        error = %remove_err,
                        "Could not remove stale score file"
                    );
                }
            }
            return Err(e);
        }
        handoff.consume()
    }

    async fn find_registered_models(&self, root: &Path) -> Result<Vec<String>> {
        self.call("find-models", &[&root.display().to_string()]).await
    }

    async fn find_registered_benchmarks(&self, root: &Path) -> Result<Vec<String>> {
        self.call("find-benchmarks", &[&root.display().to_string()])
            .await
    }

    async fn create_model_metadata(
        &self,
        model: &LoadedModel,
        model_dir_name: &str,
    ) -> Result<MetaFields> {
        self.call("model-metadata", &[&model.identifier, model_dir_name])
            .await
    }

    async fn create_stimuli_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields> {
        self.benchmark_meta("stimuli-metadata", benchmark, benchmark_dir_name)
            .await
    }

    async fn create_data_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields> {
        self.benchmark_meta("data-metadata", benchmark, benchmark_dir_name)
            .await
    }

    async fn create_metric_metadata(
        &self,
        benchmark: &LoadedBenchmark,
        benchmark_dir_name: &str,
    ) -> Result<MetaFields> {
        self.benchmark_meta("metric-metadata", benchmark, benchmark_dir_name)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conda_env_manager::fakes::RecordingRunner;
    use tempfile::tempdir;

    #[tokio::test]
    async fn load_model_parses_last_json_line() {
        let runner = RecordingRunner::new().respond(
            "load-model",
            0,
            "Downloading weights...\n{\"identifier\": \"alexnet\", \"bibtex\": \"@article{}\"}\n\n",
        );
        let plugin = ExternalDomainPlugin::new("vision", Arc::new(runner.clone()));

        let model = plugin.load_model("alexnet").await.unwrap();
        assert_eq!(model.identifier, "alexnet");
        assert_eq!(model.bibtex.as_deref(), Some("@article{}"));
        assert_eq!(
            runner.command_lines(),
            vec!["python -m brainscore_vision.plugin_management load-model alexnet"]
        );
    }

    #[tokio::test]
    async fn failing_command_is_an_env_error() {
        let runner = RecordingRunner::new().fail_on("load-benchmark", 1);
        let plugin = ExternalDomainPlugin::new("language", Arc::new(runner));
        assert!(matches!(
            plugin.load_benchmark("Futrell2018-pearsonr").await,
            Err(BrainscoreError::Env(_))
        ));
    }

    #[tokio::test]
    async fn invalid_json_is_a_domain_error() {
        let runner = RecordingRunner::new().respond("find-models", 0, "not json");
        let plugin = ExternalDomainPlugin::new("vision", Arc::new(runner));
        assert!(matches!(
            plugin.find_registered_models(Path::new("/lib")).await,
            Err(BrainscoreError::Domain(_))
        ));
    }

    #[tokio::test]
    async fn score_reads_handoff_written_by_child() {
        let scratch = tempdir().unwrap();
        let runner = RecordingRunner::new().on_run(|spec| {
            if let Some(path) = spec.env_value(SCORE_PATH_VAR) {
                ScoreHandoff::at(path)
                    .save(&Score::new(0.5).with_error(0.1))
                    .unwrap();
            }
        });
        let plugin = ExternalDomainPlugin::new("vision", Arc::new(runner.clone()))
            .with_scratch_dir(scratch.path());

        let score = plugin.score("alexnet", "MajajHong2015.IT-pls").await.unwrap();
        assert_eq!(score.center, 0.5);
        assert_eq!(score.error, Some(0.1));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);

        let calls = runner.calls();
        let handoff_path = calls[0].env_value(SCORE_PATH_VAR).unwrap();
        assert!(handoff_path.contains("conda_score--alexnet_MajajHong2015.IT-pls--"));
    }

    #[tokio::test]
    async fn score_without_handoff_fails() {
        let scratch = tempdir().unwrap();
        let plugin = ExternalDomainPlugin::new("vision", Arc::new(RecordingRunner::new()))
            .with_scratch_dir(scratch.path());
        assert!(matches!(
            plugin.score("alexnet", "bench").await,
            Err(BrainscoreError::Handoff { .. })
        ));
    }

    #[tokio::test]
    async fn failed_score_removes_partial_handoff() {
        let scratch = tempdir().unwrap();
        let runner = RecordingRunner::new()
            .on_run(|spec| {
                if let Some(path) = spec.env_value(SCORE_PATH_VAR) {
                    std::fs::write(path, "partial").unwrap();
                }
            })
            .fail_on(" score ", 1);
        let plugin = ExternalDomainPlugin::new("vision", Arc::new(runner))
            .with_scratch_dir(scratch.path());

        assert!(matches!(
            plugin.score("alexnet", "bench").await,
            Err(BrainscoreError::Env(_))
        ));
        assert_eq!(std::fs::read_dir(scratch.path()).unwrap().count(), 0);
    }
}
