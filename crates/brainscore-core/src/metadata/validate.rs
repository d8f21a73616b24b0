//! `metadata.yml` structure checks
//!
//! A metadata file maps a plugin type (`models` or `benchmarks`) to a
//! mapping of plugin identifiers, each describing one plugin with a fixed
//! set of allowed keys.

use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};

use crate::plugin::PluginType;

pub const METADATA_FILE: &str = "metadata.yml";
const METADATA_FILE_ALT: &str = "metadata.yaml";

/// Plugin types that carry metadata.
pub const ALLOWED_PLUGINS: [PluginType; 2] = [PluginType::Benchmarks, PluginType::Models];

pub const MODEL_KEYS: [&str; 12] = [
    "architecture",
    "model_family",
    "total_parameter_count",
    "trainable_parameter_count",
    "total_layers",
    "trainable_layers",
    "model_size_MB",
    "training_dataset",
    "task_specialization",
    "brainscore_link",
    "huggingface_link",
    "extra_notes",
];

pub const BENCHMARK_KEYS: [&str; 4] = ["stimulus_set", "data", "metric", "ceiling"];

/// Keys allowed per plugin entry of `plugin_type`, if it carries metadata.
pub fn allowed_keys(plugin_type: PluginType) -> Option<&'static [&'static str]> {
    match plugin_type {
        PluginType::Models => Some(&MODEL_KEYS[..]),
        PluginType::Benchmarks => Some(&BENCHMARK_KEYS[..]),
        PluginType::Data | PluginType::Metrics => None,
    }
}

/// `metadata.yml` or `metadata.yaml` in `plugin_dir`, preferring the former.
pub fn find_metadata_file(plugin_dir: &Path) -> Option<PathBuf> {
    [METADATA_FILE, METADATA_FILE_ALT]
        .iter()
        .map(|name| plugin_dir.join(name))
        .find(|path| path.is_file())
}

fn key_str(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "None".to_string(),
        other => format!("{other:?}"),
    }
}

/// Render names like a Python list literal: `['a', 'b']`.
fn list_repr<S: AsRef<str>>(items: &[S]) -> String {
    let quoted: Vec<String> = items
        .iter()
        .map(|item| format!("'{}'", item.as_ref()))
        .collect();
    format!("[{}]", quoted.join(", "))
}

fn allowed_plugins_repr() -> String {
    let names: Vec<&str> = ALLOWED_PLUGINS.iter().map(|t| t.dir_name()).collect();
    list_repr(&names)
}

/// Validate metadata content. Returns every problem found, plus the parsed
/// mapping whenever the top level is a mapping.
pub fn validate_metadata_str(content: &str) -> (Vec<String>, Option<Mapping>) {
    let data: Value = match serde_yaml::from_str(content) {
        Ok(value) => value,
        Err(e) => return (vec![format!("YAML parsing error: {e}")], None),
    };
    let Value::Mapping(data) = data else {
        return (
            vec!["Top-level structure must be a dictionary.".to_string()],
            None,
        );
    };

    let mut errors = Vec::new();
    let mut found_plugin_type = false;
    for (key, plugin_data) in &data {
        let type_name = key_str(key);
        let plugin_type = ALLOWED_PLUGINS
            .into_iter()
            .find(|t| t.dir_name() == type_name);
        let Some(plugin_type) = plugin_type else {
            errors.push(format!(
                "Top-level key '{type_name}' is not allowed. Allowed keys: {}",
                allowed_plugins_repr()
            ));
            continue;
        };
        found_plugin_type = true;

        let Value::Mapping(plugins) = plugin_data else {
            errors.push(format!(
                "'{type_name}' value must be a dictionary keyed by plugin names."
            ));
            continue;
        };
        let allowed = allowed_keys(plugin_type).unwrap_or(&[]);
        for (name, metadata) in plugins {
            let name = key_str(name);
            let Value::Mapping(metadata) = metadata else {
                errors.push(format!(
                    "Data for plugin '{name}' under '{type_name}' must be a dictionary."
                ));
                continue;
            };
            let mut extra: Vec<String> = metadata
                .keys()
                .map(key_str)
                .filter(|k| !allowed.contains(&k.as_str()))
                .collect();
            if !extra.is_empty() {
                extra.sort();
                errors.push(format!(
                    "Plugin '{name}' under '{type_name}' has extra keys: {}",
                    list_repr(&extra)
                ));
            }
        }
    }

    if !found_plugin_type {
        errors.push(format!(
            "Missing one of the required top-level keys: {}",
            allowed_plugins_repr()
        ));
    }
    (errors, Some(data))
}

/// [`validate_metadata_str`] on a file; unreadable files are reported as
/// an error entry.
pub fn validate_metadata_file(path: &Path) -> (Vec<String>, Option<Mapping>) {
    match std::fs::read_to_string(path) {
        Ok(content) => validate_metadata_str(&content),
        Err(e) => (vec![format!("Error reading file: {e}")], None),
    }
}
