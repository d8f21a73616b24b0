//! Registration discovery
//!
//! A plugin directory registers identifiers either declaratively, through a
//! `registrations.yml` manifest (`identifiers: [...]`), or by assigning into
//! its type's registry in `__init__.py`, e.g. `model_registry['alexnet'] = ...`.
//! When the manifest exists it is authoritative and the source is not read.

use std::path::Path;

use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use super::PluginType;
use crate::error::{BrainscoreError, Result};

pub const MANIFEST_FILE: &str = "registrations.yml";
pub const INIT_FILE: &str = "__init__.py";

#[derive(Debug, Deserialize)]
struct RegistrationManifest {
    #[serde(default)]
    identifiers: Vec<String>,
}

/// Identifiers declared by `plugin_dir/registrations.yml`, if present.
pub fn load_manifest(plugin_dir: &Path) -> Result<Option<Vec<String>>> {
    let path = plugin_dir.join(MANIFEST_FILE);
    if !path.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&path)?;
    let manifest: RegistrationManifest =
        serde_yaml::from_str(&content).map_err(|e| BrainscoreError::InvalidManifest {
            path: path.clone(),
            reason: e.to_string(),
        })?;
    Ok(Some(manifest.identifiers))
}

/// Whether `source` assigns `identifier` into `registry_name`.
///
/// Double quotes are normalised to single quotes before matching the
/// literal `{registry_name}['{identifier}']`.
pub fn registers(registry_name: &str, identifier: &str, source: &str) -> bool {
    let needle = format!("{registry_name}['{identifier}']");
    source
        .lines()
        .any(|line| line.replace('"', "'").contains(&needle))
}

fn registry_pattern(registry_name: &str) -> Result<Regex> {
    Regex::new(&format!(
        r#"{}\[\s*['"]([^'"]+)['"]\s*\]"#,
        regex::escape(registry_name)
    ))
    .map_err(|e| BrainscoreError::Metadata(format!("invalid registry pattern: {e}")))
}

/// Every identifier `source` assigns into `registry_name`, in order.
pub fn extract_identifiers(registry_name: &str, source: &str) -> Result<Vec<String>> {
    let pattern = registry_pattern(registry_name)?;
    Ok(pattern
        .captures_iter(source)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect())
}

/// Identifiers registered by a single plugin directory.
///
/// A directory with neither manifest nor `__init__.py` registers nothing.
pub fn scan_registrations(registry_name: &str, plugin_dir: &Path) -> Result<Vec<String>> {
    if let Some(identifiers) = load_manifest(plugin_dir)? {
        debug!(plugin_dir = %plugin_dir.display(), "Using registrations manifest");
        return Ok(identifiers);
    }
    let init_file = plugin_dir.join(INIT_FILE);
    if !init_file.is_file() {
        return Ok(Vec::new());
    }
    let source = std::fs::read_to_string(&init_file)?;
    extract_identifiers(registry_name, &source)
}

/// Identifiers registered in `domain_root/{plugin_type}/{dir}` for each of
/// `plugin_dirs`. Directories without registrations are skipped with a
/// warning.
pub fn registered_identifiers(
    plugin_type: PluginType,
    plugin_dirs: &[String],
    domain_root: &Path,
) -> Result<Vec<String>> {
    let registry_name = plugin_type.registry_name();
    let mut identifiers = Vec::new();
    for dirname in plugin_dirs {
        let plugin_dir = domain_root.join(plugin_type.dir_name()).join(dirname);
        if !plugin_dir.join(MANIFEST_FILE).is_file() && !plugin_dir.join(INIT_FILE).is_file() {
            warn!(
                plugin_dir = %plugin_dir.display(),
                "No __init__.py or registrations manifest, skipping"
            );
            continue;
        }
        identifiers.extend(scan_registrations(&registry_name, &plugin_dir)?);
    }
    Ok(identifiers)
}
