//! Scoring a model on a benchmark in a fresh conda environment
//!
//! The environment gets the domain library plus the model's and the
//! benchmark's plugin dependencies. Inside it this executable runs again as
//! `brainscore score --conda-active`, scores in-process and writes its result
//! to the handoff path passed in `BS_SCORE_PATH`.

use std::future::Future;
use std::path::{Path, PathBuf};

use brainscore_core::{
    InstallPreference, PluginLocator, PluginType, Score, ScoreHandoff, SCORE_PATH_VAR,
};
use conda_env_manager::{EnvironmentRequest, EnvironmentSession, INSTALL_PREFERENCE_VAR};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, RunnerError};
use crate::test_runner::shell_quote;

/// Fallback when the running executable cannot be determined.
pub const DEFAULT_EXECUTABLE: &str = "brainscore";

/// One isolated scoring run.
#[derive(Debug, Clone)]
pub struct CondaScore {
    /// Domain library package directory, e.g. `/src/vision/brainscore_vision`
    library_dir: PathBuf,
    model: String,
    benchmark: String,
    env_name: String,
    /// CLI re-entered inside the environment
    executable: PathBuf,
}

impl CondaScore {
    pub fn new(library_dir: &Path, model: &str, benchmark: &str) -> Self {
        Self {
            library_dir: library_dir.to_path_buf(),
            model: model.to_string(),
            benchmark: benchmark.to_string(),
            env_name: format!("{model}_{benchmark}"),
            executable: std::env::current_exe()
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_EXECUTABLE)),
        }
    }

    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        self.executable = executable.into();
        self
    }

    /// `{model}_{benchmark}`, before sanitizing.
    pub fn env_name(&self) -> &str {
        &self.env_name
    }

    fn library_name(&self) -> String {
        self.library_dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    fn repository_dir(&self) -> &Path {
        self.library_dir.parent().unwrap_or(&self.library_dir)
    }

    /// `vision` for `brainscore_vision`.
    fn domain(&self) -> Option<String> {
        self.library_name()
            .strip_prefix("brainscore_")
            .filter(|domain| !domain.is_empty())
            .map(str::to_string)
    }

    /// CLI invocation that scores in-process inside the environment.
    ///
    /// Without a recognizable library name the child falls back to
    /// `BS_DOMAIN`.
    pub fn script(&self) -> String {
        let mut script = shell_quote(&self.executable.display().to_string());
        if let Some(domain) = self.domain() {
            script.push_str(&format!(" --domain {}", shell_quote(&domain)));
        }
        script.push_str(&format!(
            " score --model {} --benchmark {} --library-dir {} --conda-active",
            shell_quote(&self.model),
            shell_quote(&self.benchmark),
            shell_quote(&self.library_dir.display().to_string()),
        ));
        script
    }

    fn plugin_dir(&self, plugin_type: PluginType, identifier: &str) -> Option<PathBuf> {
        let locator = PluginLocator::new(&self.library_dir, plugin_type.dir_name()).ok()?;
        match locator.locate(identifier) {
            Ok(dirname) => Some(locator.plugins_dir().join(dirname)),
            Err(e) => {
                debug!(identifier, error = %e, "Plugin not resolved ahead of scoring");
                None
            }
        }
    }

    /// Environment request writing the score to `handoff`.
    pub fn request(&self, handoff: &ScoreHandoff) -> EnvironmentRequest {
        let mut request = EnvironmentRequest::new(&self.env_name, self.script())
            .install_dir(self.repository_dir())
            .env(SCORE_PATH_VAR, handoff.path().display().to_string())
            .env(INSTALL_PREFERENCE_VAR, InstallPreference::Yes.as_str())
            .current_dir(self.repository_dir());
        let plugins = [
            (PluginType::Models, self.model.as_str()),
            (PluginType::Benchmarks, self.benchmark.as_str()),
        ];
        for (plugin_type, identifier) in plugins {
            if let Some(dir) = self.plugin_dir(plugin_type, identifier) {
                request = request.install_dir(dir);
            }
        }
        request
    }

    /// Run scoring in a fresh environment and read the score back.
    #[instrument(skip(self, session), fields(model = %self.model, benchmark = %self.benchmark))]
    pub async fn run(&self, session: &EnvironmentSession) -> Result<Score> {
        let handoff = ScoreHandoff::new(&self.library_dir, &self.env_name);
        let output = session.run_scoped(&self.request(&handoff)).await?;

        if !output.success() {
            if handoff.path().exists() {
                if let Err(e) = std::fs::remove_file(handoff.path()) {
                    warn!(path = %handoff.path().display(), error = %e, "Could not remove stale score file");
                }
            }
            return Err(RunnerError::ScoringFailed {
                model: self.model.clone(),
                benchmark: self.benchmark.clone(),
                return_code: output.return_code,
                stderr: output.stderr,
            });
        }

        let score = handoff.consume()?;
        info!(center = score.center, "Scored in isolated environment");
        Ok(score)
    }
}

/// Score `model` on `benchmark`.
///
/// With install preference `newenv` and no active isolated environment the
/// run happens in a fresh conda environment. Otherwise `score_fn` runs in
/// this process; when a parent assigned a handoff path the result is also
/// written there.
pub async fn wrap_score<F, Fut>(
    session: &EnvironmentSession,
    library_dir: &Path,
    model: &str,
    benchmark: &str,
    score_fn: F,
    conda_active: bool,
) -> Result<Score>
where
    F: FnOnce(String, String) -> Fut,
    Fut: Future<Output = brainscore_core::Result<Score>>,
{
    if session.config().install_preference == InstallPreference::NewEnv && !conda_active {
        return CondaScore::new(library_dir, model, benchmark).run(session).await;
    }

    let score = score_fn(model.to_string(), benchmark.to_string()).await?;
    if let Some(handoff) = ScoreHandoff::from_env() {
        handoff.save(&score)?;
        debug!(path = %handoff.path().display(), "Saved score for parent process");
    }
    Ok(score)
}
