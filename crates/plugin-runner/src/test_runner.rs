//! Per-plugin test runs in isolated environments
//!
//! A plugin directory `<library>/<domain_root>/<type>/<plugin>` is tested in
//! a fresh conda environment named `<type>__<plugin>`. The domain library and
//! the plugin's own dependencies are installed first. If the domain ships
//! generic tests for the plugin type, those run before the plugin's tests.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use brainscore_core::changes::restricted_to_model_subset;
use brainscore_core::{PluginType, MODEL_SUBSET};
use conda_env_manager::{
    validate_environment_file, EnvironmentRequest, EnvironmentSession, ENVIRONMENT_FILE,
};
use regex::Regex;
use tracing::{error, info, instrument, warn};

use crate::error::{Result, RunnerError};

/// Pattern a file name must match to count as a plugin test file.
pub const RECOGNIZED_TEST_FILES: &str = r"^test.*\.py$";

/// Domain-provided tests every plugin of a type must pass.
pub const GENERIC_PLUGIN_TEST_FILENAME: &str = "generic_plugin_tests.py";

/// Order in which plugin types are visited when testing everything.
pub const PLUGIN_TEST_ORDER: [PluginType; 4] = [
    PluginType::Benchmarks,
    PluginType::Data,
    PluginType::Metrics,
    PluginType::Models,
];

/// Markers excluded from every plugin test run.
pub const PYTEST_MARKERS: &str =
    "not requires_gpu and not memory_intense and not slow and not travis_slow";

/// pytest exit code for "no tests collected".
const NO_TESTS_COLLECTED: i32 = 5;

/// Return code per plugin name.
pub type TestResults = BTreeMap<String, i32>;

fn is_test_file(name: &str) -> bool {
    Regex::new(RECOGNIZED_TEST_FILES)
        .map(|re| re.is_match(name))
        .unwrap_or(false)
}

pub(crate) fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

/// Tests one plugin directory.
#[derive(Debug, Clone)]
pub struct PluginTestRunner {
    plugin_dir: PathBuf,
    plugin_type: String,
    library_path: PathBuf,
    plugin_name: String,
    generic_plugin_test: Option<PathBuf>,
    test_filter: Option<String>,
}

impl PluginTestRunner {
    /// Derive type, library path and environment name from `plugin_dir`.
    pub fn new(plugin_dir: &Path, test_filter: Option<String>) -> Result<Self> {
        let invalid = || RunnerError::InvalidPluginDirectory(plugin_dir.to_path_buf());

        let type_dir = plugin_dir.parent().ok_or_else(invalid)?;
        let domain_root = type_dir.parent().ok_or_else(invalid)?;
        let library_path = domain_root.parent().ok_or_else(invalid)?;
        let plugin_type = file_name(type_dir).ok_or_else(invalid)?.to_string();
        let dirname = file_name(plugin_dir).ok_or_else(invalid)?;

        let helpers = format!("{}_helpers", plugin_type.trim_matches('s'));
        let generic = domain_root.join(helpers).join(GENERIC_PLUGIN_TEST_FILENAME);

        Ok(Self {
            plugin_name: format!("{plugin_type}__{dirname}"),
            plugin_dir: plugin_dir.to_path_buf(),
            plugin_type,
            library_path: library_path.to_path_buf(),
            generic_plugin_test: generic.is_file().then_some(generic),
            test_filter: test_filter.filter(|t| !t.is_empty()),
        })
    }

    /// `<type>__<dirname>`, also the environment name.
    pub fn plugin_name(&self) -> &str {
        &self.plugin_name
    }

    pub fn plugin_type(&self) -> &str {
        &self.plugin_type
    }

    pub fn plugin_dir(&self) -> &Path {
        &self.plugin_dir
    }

    pub fn library_path(&self) -> &Path {
        &self.library_path
    }

    pub fn generic_plugin_test(&self) -> Option<&Path> {
        self.generic_plugin_test.as_deref()
    }

    /// Check the plugin has test files and an acceptable `environment.yml`.
    pub fn validate(&self, python_version: &str) -> Result<()> {
        let mut has_tests = false;
        for entry in std::fs::read_dir(&self.plugin_dir)? {
            let entry = entry?;
            if entry.file_name().to_str().is_some_and(is_test_file) {
                has_tests = true;
                break;
            }
        }
        if !has_tests {
            return Err(RunnerError::NoTestFiles {
                plugin_dir: self.plugin_dir.clone(),
                pattern: RECOGNIZED_TEST_FILES.to_string(),
            });
        }
        validate_environment_file(&self.plugin_dir, python_version)?;
        Ok(())
    }

    /// Shell command run inside the environment.
    ///
    /// Both test stages always run; the generic stage's failure takes
    /// precedence in the exit code.
    pub fn script(&self) -> String {
        let plugin_dir = shell_quote(&self.plugin_dir.display().to_string());
        let pytest = format!("pytest -m {} -vv --log-cli-level=INFO", shell_quote(PYTEST_MARKERS));

        let mut own = format!("{pytest} {plugin_dir}");
        if let Some(test) = &self.test_filter {
            own.push_str(&format!(" -k {}", shell_quote(test)));
        }

        match &self.generic_plugin_test {
            Some(generic) => format!(
                "{pytest} {} --plugin_directory {plugin_dir}; generic=$?; {own}; own=$?; \
                 if [ $generic -ne 0 ]; then exit $generic; fi; exit $own",
                shell_quote(&generic.display().to_string()),
            ),
            None => own,
        }
    }

    /// Environment request for this plugin.
    pub fn request(&self) -> EnvironmentRequest {
        let mut request = EnvironmentRequest::new(&self.plugin_name, self.script())
            .install_dir(&self.library_path)
            .install_dir(&self.plugin_dir)
            .current_dir(&self.library_path);
        let environment_file = self.plugin_dir.join(ENVIRONMENT_FILE);
        if environment_file.is_file() {
            request = request.environment_file(environment_file);
        }
        request
    }

    /// Validate, then run the tests in a fresh environment and return the
    /// test command's return code.
    #[instrument(skip(self, session), fields(plugin = %self.plugin_name))]
    pub async fn run(&self, session: &EnvironmentSession) -> Result<i32> {
        self.validate(&session.config().python_version)?;

        let output = session.run_scoped(&self.request()).await?;
        if output.success() {
            info!(duration_ms = output.duration_ms, "Plugin tests passed");
        } else {
            warn!(
                return_code = output.return_code,
                stderr = %output.stderr,
                "Plugin tests did not pass"
            );
        }
        Ok(output.return_code)
    }
}

/// Resolve the plugin a test file belongs to.
///
/// Only the last three segments of `test_file` (`type/plugin/file`) are
/// used; the plugin is resolved under `root`.
fn runner_for_test_file(
    root: &Path,
    test_file: &str,
    test: Option<&str>,
) -> Result<PluginTestRunner> {
    let segments: Vec<&str> = test_file.split('/').filter(|s| !s.is_empty()).collect();
    let [.., plugin_type, plugin_dirname, filename] = segments.as_slice() else {
        return Err(RunnerError::NotAPluginTestFile(test_file.to_string()));
    };
    if !is_test_file(filename) {
        return Err(RunnerError::UnrecognizedTestFile(filename.to_string()));
    }
    if plugin_type.parse::<PluginType>().is_err() {
        return Err(RunnerError::NotAPluginTestFile(test_file.to_string()));
    }

    let plugin_dir = root.join(plugin_type).join(plugin_dirname);
    PluginTestRunner::new(&plugin_dir, test.map(str::to_string))
}

/// Run one plugin and record its return code. A run that fails before the
/// tests execute counts as return code 1.
async fn run_recorded(
    session: &EnvironmentSession,
    runner: &PluginTestRunner,
    results: &mut TestResults,
) {
    let code = match runner.run(session).await {
        Ok(code) => code,
        Err(e) => {
            error!(plugin = %runner.plugin_name(), error = %e, "Plugin test run failed");
            1
        }
    };
    results.insert(runner.plugin_name().to_string(), code);
}

/// Run one test file, optionally restricted to tests matching `test`.
pub async fn run_specified_tests(
    session: &EnvironmentSession,
    root: &Path,
    test_file: &str,
    test: Option<&str>,
) -> Result<TestResults> {
    let runner = runner_for_test_file(root, test_file, test)?;
    let mut results = TestResults::new();
    run_recorded(session, &runner, &mut results).await;
    Ok(results)
}

/// Run the tests of every plugin under `root`.
///
/// Directories starting with `.` or `_` are skipped. With a `model_subset`
/// only those model plugins run.
pub async fn run_all_tests(
    session: &EnvironmentSession,
    root: &Path,
    model_subset: Option<&[&str]>,
) -> Result<TestResults> {
    let mut results = TestResults::new();
    for plugin_type in PLUGIN_TEST_ORDER {
        let plugins_dir = root.join(plugin_type.dir_name());
        if !plugins_dir.is_dir() {
            continue;
        }

        let mut plugins = Vec::new();
        for entry in std::fs::read_dir(&plugins_dir)? {
            let path = entry?.path();
            let Some(name) = file_name(&path) else { continue };
            if name.starts_with('.') || name.starts_with('_') || !path.is_dir() {
                continue;
            }
            if plugin_type == PluginType::Models {
                if let Some(subset) = model_subset {
                    if !subset.contains(&name) {
                        continue;
                    }
                }
            }
            plugins.push(path);
        }
        plugins.sort();

        for plugin in plugins {
            let runner = PluginTestRunner::new(&plugin, None)?;
            run_recorded(session, &runner, &mut results).await;
        }
    }
    Ok(results)
}

/// Run the given test files, or every plugin's tests when none are given,
/// and fail with all plugins whose return code is neither 0 nor 5.
///
/// Every named test file is checked before any environment is created.
/// Plugins are then all attempted; one failing run does not stop the rest.
pub async fn run_args(
    session: &EnvironmentSession,
    root: &Path,
    test_files: &[String],
    test: Option<&str>,
) -> Result<TestResults> {
    let results = if test_files.is_empty() {
        let subset: Option<&[&str]> = if restricted_to_model_subset(root, PluginType::Models) {
            Some(&MODEL_SUBSET)
        } else {
            None
        };
        run_all_tests(session, root, subset).await?
    } else {
        let mut runners = Vec::with_capacity(test_files.len());
        for test_file in test_files {
            if !Path::new(test_file).exists() {
                return Err(RunnerError::MissingTestFile(PathBuf::from(test_file)));
            }
            runners.push(runner_for_test_file(root, test_file, test)?);
        }

        let mut results = TestResults::new();
        for runner in &runners {
            run_recorded(session, runner, &mut results).await;
        }
        results
    };

    let failures: TestResults = results
        .iter()
        .filter(|(_, code)| **code != 0 && **code != NO_TESTS_COLLECTED)
        .map(|(name, code)| (name.clone(), *code))
        .collect();
    if !failures.is_empty() {
        return Err(RunnerError::PluginTestsFailed { failures });
    }
    info!(plugins = results.len(), "All plugin tests passed");
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn plugin_library(with_generic: bool) -> (TempDir, PathBuf) {
        let tmp = tempfile::tempdir().unwrap();
        let plugin = tmp.path().join("brainscore_dummy/models/alexnet");
        std::fs::create_dir_all(&plugin).unwrap();
        std::fs::write(plugin.join("test.py"), "def test_x(): pass\n").unwrap();
        if with_generic {
            let helpers = tmp.path().join("brainscore_dummy/model_helpers");
            std::fs::create_dir_all(&helpers).unwrap();
            std::fs::write(helpers.join(GENERIC_PLUGIN_TEST_FILENAME), "").unwrap();
        }
        (tmp, plugin)
    }

    #[test]
    fn test_derives_names_from_path() {
        let (tmp, plugin) = plugin_library(false);
        let runner = PluginTestRunner::new(&plugin, None).unwrap();
        assert_eq!(runner.plugin_name(), "models__alexnet");
        assert_eq!(runner.plugin_type(), "models");
        assert_eq!(runner.library_path(), tmp.path());
        assert!(runner.generic_plugin_test().is_none());
    }

    #[test]
    fn test_resolves_generic_plugin_test() {
        let (tmp, plugin) = plugin_library(true);
        let runner = PluginTestRunner::new(&plugin, None).unwrap();
        assert_eq!(
            runner.generic_plugin_test().unwrap(),
            tmp.path().join("brainscore_dummy/model_helpers/generic_plugin_tests.py")
        );
        let script = runner.script();
        let generic_at = script.find("generic_plugin_tests.py").unwrap();
        let own_at = script.rfind("alexnet'").unwrap();
        assert!(generic_at < own_at);
        assert!(script.contains("--plugin_directory"));
    }

    #[test]
    fn test_shallow_path_is_rejected() {
        let err = PluginTestRunner::new(Path::new("alexnet"), None).unwrap_err();
        assert!(matches!(err, RunnerError::InvalidPluginDirectory(_)));
    }

    #[test]
    fn test_script_applies_markers_and_filter() {
        let (_tmp, plugin) = plugin_library(false);
        let runner = PluginTestRunner::new(&plugin, Some("test_exact".into())).unwrap();
        let script = runner.script();
        assert!(script.starts_with("pytest -m 'not requires_gpu and not memory_intense"));
        assert!(script.ends_with("-k 'test_exact'"));
        assert!(!script.contains("--plugin_directory"));
    }

    #[test]
    fn test_validate_requires_test_file() {
        let (_tmp, plugin) = plugin_library(false);
        std::fs::remove_file(plugin.join("test.py")).unwrap();
        std::fs::write(plugin.join("helpers.py"), "").unwrap();
        let runner = PluginTestRunner::new(&plugin, None).unwrap();
        assert!(matches!(
            runner.validate("3.11"),
            Err(RunnerError::NoTestFiles { .. })
        ));

        std::fs::write(plugin.join("test_data.py"), "").unwrap();
        runner.validate("3.11").unwrap();
    }

    #[test]
    fn test_validate_checks_environment_file() {
        let (_tmp, plugin) = plugin_library(false);
        std::fs::write(
            plugin.join(ENVIRONMENT_FILE),
            "name: mine\ndependencies:\n  - python=3.11\n",
        )
        .unwrap();
        let runner = PluginTestRunner::new(&plugin, None).unwrap();
        assert!(matches!(runner.validate("3.11"), Err(RunnerError::Env(_))));
    }

    #[test]
    fn test_request_installs_library_then_plugin() {
        let (tmp, plugin) = plugin_library(false);
        std::fs::write(plugin.join(ENVIRONMENT_FILE), "dependencies:\n  - numpy\n").unwrap();
        let request = PluginTestRunner::new(&plugin, None).unwrap().request();
        assert_eq!(request.env_name, "models__alexnet");
        assert_eq!(request.install_dirs, vec![tmp.path().to_path_buf(), plugin.clone()]);
        assert_eq!(request.environment_file, Some(plugin.join(ENVIRONMENT_FILE)));
    }

    #[test]
    fn test_shell_quote_escapes_single_quotes() {
        assert_eq!(shell_quote("it's"), r"'it'\''s'");
    }
}
