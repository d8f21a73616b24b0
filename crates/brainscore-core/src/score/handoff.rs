//! File-based score handoff between a parent and an isolated child process
//!
//! The parent picks a unique path next to the library directory and passes
//! it to the child through `BS_SCORE_PATH`. The child writes a JSON envelope
//! carrying the serialized score and its SHA-256 digest; the parent reads
//! it exactly once and deletes it.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use uuid::Uuid;

use super::Score;
use crate::error::{BrainscoreError, Result};

/// Environment variable carrying the handoff path into the child.
pub const SCORE_PATH_VAR: &str = "BS_SCORE_PATH";

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    digest: String,
    payload: String,
}

fn digest(payload: &str) -> String {
    hex::encode(Sha256::digest(payload.as_bytes()))
}

/// One handoff location, used once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoreHandoff {
    path: PathBuf,
}

impl ScoreHandoff {
    /// Fresh path `{parent of library_dir}/conda_score--{env_name}--{uuid}.json`.
    pub fn new(library_dir: &Path, env_name: &str) -> Self {
        let parent = library_dir.parent().unwrap_or(library_dir);
        let file = format!("conda_score--{}--{}.json", env_name, Uuid::new_v4());
        Self {
            path: parent.join(file),
        }
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The handoff assigned by a parent process, if any.
    pub fn from_env() -> Option<Self> {
        std::env::var_os(SCORE_PATH_VAR)
            .filter(|v| !v.is_empty())
            .map(Self::at)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn fail(&self, reason: impl Into<String>) -> BrainscoreError {
        BrainscoreError::Handoff {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }

    pub fn save(&self, score: &Score) -> Result<()> {
        score.ensure_finite()?;
        let payload = serde_json::to_string(score)?;
        let envelope = Envelope {
            digest: digest(&payload),
            payload,
        };
        std::fs::write(&self.path, serde_json::to_vec(&envelope)?)
            .map_err(|e| self.fail(format!("write failed: {e}")))?;
        debug!(path = %self.path.display(), "Saved score handoff");
        Ok(())
    }

    /// Read and verify the handoff file, then delete it.
    ///
    /// The file is only removed once a score was recovered from it.
    pub fn consume(&self) -> Result<Score> {
        let bytes = std::fs::read(&self.path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                self.fail("no score was written")
            } else {
                self.fail(format!("read failed: {e}"))
            }
        })?;

        let envelope: Envelope = serde_json::from_slice(&bytes)
            .map_err(|e| self.fail(format!("malformed envelope: {e}")))?;
        let actual = digest(&envelope.payload);
        if actual != envelope.digest {
            return Err(self.fail(format!(
                "digest mismatch: expected {}, got {}",
                envelope.digest, actual
            )));
        }
        let score: Score = serde_json::from_str(&envelope.payload)
            .map_err(|e| self.fail(format!("malformed score: {e}")))?;

        std::fs::remove_file(&self.path).map_err(|e| self.fail(format!("remove failed: {e}")))?;
        debug!(path = %self.path.display(), "Consumed score handoff");
        Ok(score)
    }
}
