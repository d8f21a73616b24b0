//! In-memory command runner (testing only)
//!
//! `RecordingRunner` records every invocation and answers from a script of
//! substring rules instead of spawning processes.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::command::{CommandOutput, CommandRunner, CommandSpec};
use crate::Result;

type Hook = Arc<dyn Fn(&CommandSpec) + Send + Sync>;

#[derive(Debug, Clone)]
struct Rule {
    needle: String,
    return_code: i32,
    stdout: String,
}

/// Scripted [`CommandRunner`] that never spawns a process.
///
/// A command matches a rule when its rendered command line contains the
/// rule's substring. The first matching rule wins; unmatched commands
/// succeed with empty output.
#[derive(Default, Clone)]
pub struct RecordingRunner {
    rules: Arc<Mutex<Vec<Rule>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
    hooks: Arc<Mutex<Vec<Hook>>>,
}

impl std::fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("rules", &self.rules)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return `return_code` for commands containing `needle`.
    pub fn fail_on(self, needle: impl Into<String>, return_code: i32) -> Self {
        self.respond(needle, return_code, "")
    }

    /// Answer commands containing `needle` with the given code and stdout.
    pub fn respond(
        self,
        needle: impl Into<String>,
        return_code: i32,
        stdout: impl Into<String>,
    ) -> Self {
        self.rules.lock().unwrap().push(Rule {
            needle: needle.into(),
            return_code,
            stdout: stdout.into(),
        });
        self
    }

    /// Run `hook` on every command before answering it.
    pub fn on_run<F>(self, hook: F) -> Self
    where
        F: Fn(&CommandSpec) + Send + Sync + 'static,
    {
        self.hooks.lock().unwrap().push(Arc::new(hook));
        self
    }

    /// All recorded invocations, in order.
    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Rendered command lines, in order.
    pub fn command_lines(&self) -> Vec<String> {
        self.calls().iter().map(ToString::to_string).collect()
    }

    /// Number of recorded invocations whose command line contains `needle`.
    pub fn count_matching(&self, needle: &str) -> usize {
        self.command_lines()
            .iter()
            .filter(|line| line.contains(needle))
            .count()
    }

    fn answer(&self, spec: &CommandSpec) -> CommandOutput {
        self.calls.lock().unwrap().push(spec.clone());
        let hooks = self.hooks.lock().unwrap().clone();
        for hook in hooks {
            hook(spec);
        }

        let line = spec.to_string();
        let rules = self.rules.lock().unwrap();
        let (return_code, stdout) = rules
            .iter()
            .find(|rule| line.contains(&rule.needle))
            .map(|rule| (rule.return_code, rule.stdout.clone()))
            .unwrap_or((0, String::new()));

        CommandOutput {
            return_code,
            stdout,
            stderr: String::new(),
            duration_ms: 0,
        }
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(self.answer(spec))
    }

    fn run_blocking(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Ok(self.answer(spec))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unmatched_commands_succeed() {
        let runner = RecordingRunner::new();
        let output = runner.run(&CommandSpec::new("conda")).await.unwrap();
        assert!(output.success());
        assert_eq!(runner.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_first_matching_rule_wins() {
        let runner = RecordingRunner::new()
            .respond("pytest", 5, "no tests ran")
            .fail_on("py", 1);
        let output = runner
            .run(&CommandSpec::new("bash").args(["-c", "pytest x"]))
            .await
            .unwrap();
        assert_eq!(output.return_code, 5);
        assert_eq!(output.stdout, "no tests ran");
    }

    #[test]
    fn test_hooks_see_blocking_calls() {
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        let runner = RecordingRunner::new().on_run(move |_| *counter.lock().unwrap() += 1);
        runner.run_blocking(&CommandSpec::new("conda")).unwrap();
        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(runner.count_matching("conda"), 1);
    }
}
