//! Opening metadata pull requests with `git` and the GitHub CLI

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use conda_env_manager::{CommandRunner, CommandSpec};
use tracing::{info, instrument};

use crate::error::{BrainscoreError, Result};
use crate::metadata::validate::METADATA_FILE;

pub const METADATA_BRANCH_PREFIX: &str = "auto/metadata-update";
pub const METADATA_PR_TITLE: &str = "Auto-add/update metadata.yml for plugin";
pub const METADATA_PR_BODY: &str =
    "This PR was automatically generated to add or update the metadata.yml file.";
pub const METADATA_PR_LABEL: &str = "automerge-metadata";

/// Runs `git`/`gh` in a checked-out repository with push rights.
#[derive(Clone)]
pub struct GitClient {
    runner: Arc<dyn CommandRunner>,
    repo_dir: Option<PathBuf>,
    settle_delay: Duration,
}

impl GitClient {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            repo_dir: None,
            settle_delay: Duration::from_secs(5),
        }
    }

    pub fn with_repo_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = Some(dir.into());
        self
    }

    /// Pause between creating a PR and querying its number.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    async fn run<I, S>(&self, program: &str, args: I) -> Result<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut spec = CommandSpec::new(program).args(args);
        if let Some(dir) = &self.repo_dir {
            spec = spec.current_dir(dir.clone());
        }
        let output = self.runner.run(&spec).await?;
        if !output.success() {
            return Err(BrainscoreError::GitError(format!(
                "`{}` exited with {}: {}",
                spec,
                output.return_code,
                output.stderr.trim()
            )));
        }
        Ok(output.stdout)
    }

    /// Commit `plugin_dir/metadata.yml` on a fresh branch, push it and open
    /// a labelled pull request. Returns the PR number.
    #[instrument(skip(self), fields(plugin_dir = %plugin_dir.display()))]
    pub async fn create_metadata_pr(&self, plugin_dir: &Path) -> Result<String> {
        let metadata_path = plugin_dir.join(METADATA_FILE).display().to_string();
        let branch = format!(
            "{}_{}",
            METADATA_BRANCH_PREFIX,
            chrono::Utc::now().timestamp()
        );

        self.run("git", ["checkout", "-b", branch.as_str()]).await?;
        self.run("git", ["add", metadata_path.as_str()]).await?;
        self.run("git", ["commit", "-m", METADATA_PR_TITLE]).await?;
        self.run("git", ["push", "origin", branch.as_str()]).await?;
        self.run(
            "gh",
            [
                "pr",
                "create",
                "--title",
                METADATA_PR_TITLE,
                "--body",
                METADATA_PR_BODY,
                "--label",
                METADATA_PR_LABEL,
            ],
        )
        .await?;
        info!(branch = %branch, "Pull request created for metadata.yml update");

        if !self.settle_delay.is_zero() {
            tokio::time::sleep(self.settle_delay).await;
        }
        let number = self
            .run("gh", ["pr", "view", "--json", "number", "--jq", ".number"])
            .await?;
        Ok(number.trim().to_string())
    }
}
