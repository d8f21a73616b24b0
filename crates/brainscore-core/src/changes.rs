//! Change-driven scope resolution
//!
//! Classifies the files touched by a pull request into plugin files,
//! plugin-related shared files and everything else, and derives which
//! plugins need testing or scoring. Paths are relative to the repository
//! root, e.g. `brainscore_vision/models/alexnet/model.py`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::error::{BrainscoreError, Result};
use crate::plugin::{registered_identifiers, PluginType};

/// Shared interface files whose change affects every plugin of every type.
pub const SPECIAL_PLUGIN_FILES: [&str; 2] = [
    "brainscore_vision/model_interface.py",
    "brainscore_language/artificial_subject.py",
];

/// Vision models tested when every model would otherwise be in scope.
pub const MODEL_SUBSET: [&str; 13] = [
    "hmax",
    "alexnet",
    "CORnet-S",
    "resnet-50-robust",
    "voneresnet-50-non_stochastic",
    "resnet18-local_aggregation",
    "grcnn_robust_v1",
    "custom_model_cv_18_dagger_408",
    "ViT_L_32_imagenet1k",
    "mobilenet_v2_1.4_224",
    "pixels",
    "cvt_cvt-w24-384-in22k_finetuned-in1k_4",
    "effnetb1_cutmixpatch_augmix_robust32_avge4e7_manylayers_324x288",
];

const VISION_LIBRARY: &str = "brainscore_vision";

/// Whether only [`MODEL_SUBSET`] should run for `plugin_type` under
/// `domain_root`.
pub fn restricted_to_model_subset(domain_root: &Path, plugin_type: PluginType) -> bool {
    plugin_type == PluginType::Models
        && domain_root.file_name().and_then(|n| n.to_str()) == Some(VISION_LIBRARY)
}

/// Changed files split by role.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeparatedFiles {
    /// Files inside a plugin directory.
    pub plugin: Vec<String>,
    /// Files unrelated to plugins (README, packaging, library code).
    pub non_plugin: Vec<String>,
    /// Shared files that put a whole plugin type in scope.
    pub plugin_related: Vec<String>,
}

/// Split `files` into plugin, non-plugin and plugin-related files.
///
/// `is_dir` decides whether a three-segment path such as
/// `lib/models/alexnet` names a plugin directory rather than a file like
/// `lib/models/__init__.py`.
pub fn separate_plugin_files<F>(files: &[String], is_dir: F) -> SeparatedFiles
where
    F: Fn(&str) -> bool,
{
    let mut separated = SeparatedFiles::default();
    for file in files {
        let segments: Vec<&str> = file.split('/').collect();
        let subdir = segments.get(1).copied();

        if PluginType::ALL.iter().any(|t| Some(t.dir_name()) == subdir) {
            if segments.len() == 3 && !is_dir(file) {
                separated.plugin_related.push(file.clone());
            } else {
                separated.plugin.push(file.clone());
            }
        } else if PluginType::ALL
            .iter()
            .any(|t| Some(t.helpers_dir().as_str()) == subdir)
        {
            separated.plugin_related.push(file.clone());
        } else if SPECIAL_PLUGIN_FILES.contains(&file.as_str()) {
            separated.plugin_related.push(file.clone());
        } else {
            separated.non_plugin.push(file.clone());
        }
    }
    separated
}

/// Plugin directory names touched per type, sorted and unique.
pub fn changed_plugins(
    plugin_files: &[String],
    domain_root: &str,
) -> BTreeMap<PluginType, Vec<String>> {
    PluginType::ALL
        .into_iter()
        .map(|plugin_type| {
            let prefix = format!("{}/{}/", domain_root, plugin_type.dir_name());
            let names: BTreeSet<String> = plugin_files
                .iter()
                .filter(|f| f.starts_with(&prefix))
                .filter_map(|f| f.split('/').nth(2).map(str::to_string))
                .collect();
            (plugin_type, names.into_iter().collect())
        })
        .collect()
}

/// Plugin types for which every plugin must be tested.
///
/// A special interface file puts all types in scope. Otherwise each related
/// file must name exactly one type; `data` and `metrics` changes also pull
/// in `benchmarks`, which consume them.
pub fn plugin_types_to_test_all(plugin_related: &[String]) -> Result<Vec<PluginType>> {
    if plugin_related
        .iter()
        .any(|f| SPECIAL_PLUGIN_FILES.contains(&f.as_str()))
    {
        return Ok(PluginType::ALL.to_vec());
    }

    let mut types = BTreeSet::new();
    for file in plugin_related {
        let matching: Vec<PluginType> = PluginType::ALL
            .into_iter()
            .filter(|t| file.contains(t.singular()))
            .collect();
        if matching.len() != 1 {
            return Err(BrainscoreError::InvalidChanges(format!(
                "expected exactly one plugin type to be associated with file {file}, found {matching:?}"
            )));
        }
        types.insert(matching[0]);
    }

    if types.contains(&PluginType::Data) || types.contains(&PluginType::Metrics) {
        types.insert(PluginType::Benchmarks);
    }
    Ok(types.into_iter().collect())
}

/// What a set of changed files means for plugin testing and scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginChanges {
    pub modifies_plugins: bool,
    pub changed_plugins: BTreeMap<PluginType, Vec<String>>,
    pub test_all_plugins: Vec<PluginType>,
    pub is_automergeable: bool,
}

impl PluginChanges {
    pub fn changed(&self, plugin_type: PluginType) -> &[String] {
        self.changed_plugins
            .get(&plugin_type)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Parse whitespace-separated changed file paths, checking plugin
/// directories against the filesystem.
pub fn parse_plugin_changes(changed_files: &str, domain_root: &str) -> Result<PluginChanges> {
    parse_plugin_changes_with(changed_files, domain_root, |f| Path::new(f).is_dir())
}

/// [`parse_plugin_changes`] with an explicit directory check.
pub fn parse_plugin_changes_with<F>(
    changed_files: &str,
    domain_root: &str,
    is_dir: F,
) -> Result<PluginChanges>
where
    F: Fn(&str) -> bool,
{
    if changed_files.trim().is_empty() {
        return Err(BrainscoreError::InvalidChanges("No files changed".to_string()));
    }
    if changed_files.contains("fatal") {
        return Err(BrainscoreError::InvalidChanges(
            "Unable to retrieve changed files".to_string(),
        ));
    }

    let files: Vec<String> = changed_files.split_whitespace().map(str::to_string).collect();
    let separated = separate_plugin_files(&files, is_dir);
    debug!(
        plugin = separated.plugin.len(),
        non_plugin = separated.non_plugin.len(),
        related = separated.plugin_related.len(),
        "Separated changed files"
    );

    Ok(PluginChanges {
        modifies_plugins: !separated.plugin.is_empty() || !separated.plugin_related.is_empty(),
        changed_plugins: changed_plugins(&separated.plugin, domain_root),
        test_all_plugins: plugin_types_to_test_all(&separated.plugin_related)?,
        is_automergeable: separated.non_plugin.is_empty() && separated.plugin_related.is_empty(),
    })
}

/// Python-style boolean, as consumed by CI shell steps.
pub fn py_bool(value: bool) -> &'static str {
    if value {
        "True"
    } else {
        "False"
    }
}

/// [`PluginChanges`] plus what needs scoring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoringInfo {
    #[serde(flatten)]
    pub changes: PluginChanges,
    pub run_score: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_models: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub new_benchmarks: Option<String>,
}

/// Scoring is needed when any model or benchmark plugin changed; the
/// identifiers they register are listed space-separated.
pub fn scoring_info(changed_files: &str, domain_root: &str) -> Result<ScoringInfo> {
    let changes = parse_plugin_changes(changed_files, domain_root)?;
    let scoring_types = [PluginType::Models, PluginType::Benchmarks];
    let run_score = scoring_types.iter().any(|t| !changes.changed(*t).is_empty());

    let mut info = ScoringInfo {
        run_score: py_bool(run_score).to_string(),
        new_models: None,
        new_benchmarks: None,
        changes,
    };
    if run_score {
        let root = Path::new(domain_root);
        let models =
            registered_identifiers(PluginType::Models, info.changes.changed(PluginType::Models), root)?;
        let benchmarks = registered_identifiers(
            PluginType::Benchmarks,
            info.changes.changed(PluginType::Benchmarks),
            root,
        )?;
        info.new_models = Some(models.join(" "));
        info.new_benchmarks = Some(benchmarks.join(" "));
    }
    Ok(info)
}

/// `"{modifies_plugins} {is_automergeable}"`.
pub fn testing_info(changed_files: &str, domain_root: &str) -> Result<String> {
    let changes = parse_plugin_changes(changed_files, domain_root)?;
    Ok(format!(
        "{} {}",
        py_bool(changes.modifies_plugins),
        py_bool(changes.is_automergeable)
    ))
}

/// `"{is_automergeable}"`.
pub fn is_plugin_only(changed_files: &str, domain_root: &str) -> Result<String> {
    let changes = parse_plugin_changes(changed_files, domain_root)?;
    Ok(py_bool(changes.is_automergeable).to_string())
}

/// All `test*.py` files below `dir`, sorted.
pub fn test_file_paths(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BrainscoreError::MissingPluginDirectory(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.starts_with("test") && name.ends_with(".py")
        })
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Test files to run for `changes`.
///
/// Types in `test_all_plugins` contribute every plugin directory (only
/// [`MODEL_SUBSET`] for vision models); other types contribute the changed
/// plugin directories that still exist.
pub fn tests_for_changes(changes: &PluginChanges, domain_root: &Path) -> Result<Vec<PathBuf>> {
    if !changes.modifies_plugins {
        return Err(BrainscoreError::InvalidChanges(
            "Expected at least one plugin changed or added, none found.".to_string(),
        ));
    }

    let mut tests = Vec::new();
    for plugin_type in PluginType::ALL {
        let type_dir = domain_root.join(plugin_type.dir_name());
        if changes.test_all_plugins.contains(&plugin_type) {
            if !type_dir.is_dir() {
                continue;
            }
            let subset_only = restricted_to_model_subset(domain_root, plugin_type);
            for plugin_dir in sorted_subdirs(&type_dir)? {
                let name = plugin_dir
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string())
                    .unwrap_or_default();
                if subset_only && !MODEL_SUBSET.contains(&name.as_str()) {
                    continue;
                }
                tests.extend(test_file_paths(&plugin_dir)?);
            }
        } else {
            for dirname in changes.changed(plugin_type) {
                let plugin_dir = type_dir.join(dirname);
                if plugin_dir.is_dir() {
                    tests.extend(test_file_paths(&plugin_dir)?);
                }
            }
        }
    }

    info!(count = tests.len(), "Collected tests for new or modified plugins");
    Ok(tests)
}
