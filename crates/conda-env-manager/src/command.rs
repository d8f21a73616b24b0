//! Command execution seam
//!
//! Every external tool (conda, pip, bash, pytest) is invoked through the
//! [`CommandRunner`] trait so the lifecycle can be driven by a fake in tests.

use crate::error::EnvError;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tracing::debug;

/// A single external command invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub current_dir: Option<PathBuf>,
    /// Timeout in seconds (0 = wait indefinitely)
    pub timeout_secs: u64,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            current_dir: None,
            timeout_secs: 0,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Value of an environment variable set on this command, if any.
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.envs
            .iter()
            .rev()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains(' ') {
                write!(f, " '{}'", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Completion of a command. Callers interpret only the return code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutput {
    /// Exit code (-1 when terminated by a signal)
    pub return_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.return_code == 0
    }

    /// Turn a non-zero return code into [`EnvError::CommandFailed`].
    pub fn check(self, spec: &CommandSpec) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(EnvError::CommandFailed {
                command: spec.to_string(),
                return_code: self.return_code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }
}

/// Backend that executes commands.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Execute a command to completion.
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput>;

    /// Execute a command synchronously. Used from `Drop` where no runtime
    /// can be awaited.
    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput>;
}

/// Runs commands as real child processes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl ProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

fn spawn_error(spec: &CommandSpec, err: std::io::Error) -> EnvError {
    if err.kind() == std::io::ErrorKind::NotFound {
        EnvError::ExecutableNotFound(spec.program.clone())
    } else {
        EnvError::Io(err)
    }
}

fn to_output(output: std::process::Output, start: Instant) -> CommandOutput {
    CommandOutput {
        return_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        debug!(command = %spec, "Spawning command");
        let start = Instant::now();

        let mut command = Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|e| spawn_error(spec, e))?;

        let output = if spec.timeout_secs > 0 {
            tokio::time::timeout(
                Duration::from_secs(spec.timeout_secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| EnvError::Timeout {
                command: spec.to_string(),
                timeout_secs: spec.timeout_secs,
            })??
        } else {
            child.wait_with_output().await?
        };

        let output = to_output(output, start);
        debug!(
            command = %spec,
            return_code = output.return_code,
            duration_ms = output.duration_ms,
            "Command finished"
        );
        Ok(output)
    }

    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let start = Instant::now();
        let mut command = std::process::Command::new(&spec.program);
        command
            .args(&spec.args)
            .envs(spec.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null());
        if let Some(dir) = &spec.current_dir {
            command.current_dir(dir);
        }
        let output = command.output().map_err(|e| spawn_error(spec, e))?;
        Ok(to_output(output, start))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_quotes_args_with_spaces() {
        let spec = CommandSpec::new("bash").args(["-c", "echo hello"]);
        assert_eq!(spec.to_string(), "bash -c 'echo hello'");
    }

    #[test]
    fn test_env_value_prefers_last() {
        let spec = CommandSpec::new("true").env("A", "1").env("A", "2");
        assert_eq!(spec.env_value("A"), Some("2"));
        assert_eq!(spec.env_value("B"), None);
    }

    #[test]
    fn test_check_maps_failure() {
        let spec = CommandSpec::new("false");
        let output = CommandOutput {
            return_code: 2,
            stdout: String::new(),
            stderr: "boom\n".to_string(),
            duration_ms: 1,
        };
        match output.check(&spec) {
            Err(EnvError::CommandFailed {
                return_code, stderr, ..
            }) => {
                assert_eq!(return_code, 2);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_process_runner_captures_stdout() {
        let spec = CommandSpec::new("echo").arg("hello");
        let output = ProcessRunner::new().run(&spec).await.expect("run failed");
        assert!(output.success());
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_process_runner_reports_return_code() {
        let spec = CommandSpec::new("sh").args(["-c", "exit 5"]);
        let output = ProcessRunner::new().run(&spec).await.expect("run failed");
        assert_eq!(output.return_code, 5);
    }

    #[tokio::test]
    async fn test_process_runner_passes_env() {
        let spec = CommandSpec::new("sh")
            .args(["-c", "echo $BS_TEST_VALUE"])
            .env("BS_TEST_VALUE", "forwarded");
        let output = ProcessRunner::new().run(&spec).await.expect("run failed");
        assert!(output.stdout.contains("forwarded"));
    }

    #[tokio::test]
    async fn test_process_runner_missing_executable() {
        let spec = CommandSpec::new("definitely-not-a-real-binary-bs");
        let err = ProcessRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, EnvError::ExecutableNotFound(_)));
    }

    #[tokio::test]
    async fn test_process_runner_timeout() {
        let spec = CommandSpec::new("sleep").arg("5").timeout(1);
        let err = ProcessRunner::new().run(&spec).await.unwrap_err();
        assert!(matches!(err, EnvError::Timeout { .. }));
    }

    #[test]
    fn test_run_blocking() {
        let spec = CommandSpec::new("sh").args(["-c", "exit 3"]);
        let output = ProcessRunner::new().run_blocking(&spec).unwrap();
        assert_eq!(output.return_code, 3);
    }
}
