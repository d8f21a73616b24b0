//! Persisting validated metadata into the score ledger

use std::sync::Arc;

use score_ledger::{MetaFields, MetaKind, ModelMetadataRecord, SubmissionLedger};
use serde_yaml::{Mapping, Value};
use tracing::{info, instrument, warn};

use crate::error::{BrainscoreError, Result};
use crate::plugin::PluginType;

/// Ledger column name for a `models:` metadata key.
pub fn model_field_name(key: &str) -> String {
    match key {
        "huggingface_link" => "hugging_face_link".to_string(),
        "model_size_MB" => "model_size_mb".to_string(),
        other => other.to_string(),
    }
}

/// Section of a `benchmarks:` entry holding the given kind.
pub fn benchmark_section(kind: MetaKind) -> &'static str {
    match kind {
        MetaKind::Stimuli => "stimulus_set",
        MetaKind::Data => "data",
        MetaKind::Metric => "metric",
    }
}

fn yaml_to_json(value: &Value) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(value)?)
}

fn key_string(key: &Value) -> Option<String> {
    key.as_str().map(str::to_string)
}

/// Columns of `kind` taken from `section`; absent columns are stored as
/// null, except metric `public` which defaults to false.
fn benchmark_fields(kind: MetaKind, section: Option<&Mapping>) -> Result<MetaFields> {
    let mut fields = MetaFields::new();
    for &column in kind.fields() {
        let value = match section.and_then(|s| s.get(column)) {
            Some(v) => yaml_to_json(v)?,
            None => serde_json::Value::Null,
        };
        fields.insert(column.to_string(), value);
    }
    if kind == MetaKind::Metric {
        if let Some(public) = fields.get_mut("public") {
            if public.is_null() {
                *public = serde_json::Value::Bool(false);
            }
        }
    }
    Ok(fields)
}

/// Writes model and benchmark metadata to a [`SubmissionLedger`].
#[derive(Clone)]
pub struct MetadataEndpoint {
    ledger: Arc<dyn SubmissionLedger>,
}

impl MetadataEndpoint {
    pub fn new(ledger: Arc<dyn SubmissionLedger>) -> Self {
        Self { ledger }
    }

    /// Persist every entry under the `plugin_type` section of `data`.
    /// Returns the number of entries written.
    #[instrument(skip(self, data))]
    pub async fn persist(&self, plugin_type: PluginType, data: &Mapping) -> Result<usize> {
        let Some(section) = data.get(plugin_type.dir_name()) else {
            warn!(%plugin_type, "No metadata section to persist");
            return Ok(0);
        };
        let entries = section.as_mapping().ok_or_else(|| {
            BrainscoreError::Metadata(format!("'{plugin_type}' section is not a mapping"))
        })?;

        let mut written = 0;
        for (name, entry) in entries {
            let Some(name) = key_string(name) else {
                warn!(?name, "Skipping metadata entry with non-string name");
                continue;
            };
            let Some(entry) = entry.as_mapping() else {
                warn!(name = %name, "Skipping metadata entry that is not a mapping");
                continue;
            };
            match plugin_type {
                PluginType::Models => self.persist_model(&name, entry).await?,
                PluginType::Benchmarks => self.persist_benchmark(&name, entry).await?,
                other => {
                    return Err(BrainscoreError::Metadata(format!(
                        "Unsupported plugin type: {other}"
                    )))
                }
            }
            written += 1;
        }
        info!(%plugin_type, written, "Persisted metadata");
        Ok(written)
    }

    async fn persist_model(&self, model_name: &str, entry: &Mapping) -> Result<()> {
        let mut fields = MetaFields::new();
        for (key, value) in entry {
            if let Some(key) = key_string(key) {
                fields.insert(model_field_name(&key), yaml_to_json(value)?);
            }
        }
        self.ledger
            .upsert_model_metadata(&ModelMetadataRecord {
                model_name: model_name.to_string(),
                fields,
            })
            .await?;
        Ok(())
    }

    /// Update the meta records referenced by the benchmark's first instance
    /// (or create them) and attach them to every instance.
    async fn persist_benchmark(&self, benchmark: &str, entry: &Mapping) -> Result<()> {
        let mut instances = self.ledger.benchmark_instances(benchmark).await?;
        if instances.is_empty() {
            warn!(benchmark, "No benchmark instances to attach metadata to");
        }

        let mut meta_ids = Vec::new();
        for kind in MetaKind::ALL {
            let section = entry
                .get(benchmark_section(kind))
                .and_then(Value::as_mapping);
            let fields = benchmark_fields(kind, section)?;
            let existing = instances.first().and_then(|i| i.meta_id(kind)).map(str::to_string);
            let meta_id = self
                .ledger
                .upsert_benchmark_meta(kind, existing.as_deref(), &fields)
                .await?;
            meta_ids.push((kind, meta_id));
        }

        for instance in &mut instances {
            for (kind, meta_id) in &meta_ids {
                instance.set_meta_id(*kind, meta_id.clone());
            }
            self.ledger.update_benchmark_instance(instance).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use score_ledger::fakes::MemoryLedger;

    fn mapping(yaml: &str) -> Mapping {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[tokio::test]
    async fn model_fields_are_renamed() {
        let ledger = Arc::new(MemoryLedger::new());
        let endpoint = MetadataEndpoint::new(ledger.clone());
        let data = mapping(
            "models:\n  alexnet:\n    architecture: DCNN\n    huggingface_link: https://hf.co/x\n    model_size_MB: 233.1\n",
        );

        assert_eq!(endpoint.persist(PluginType::Models, &data).await.unwrap(), 1);
        let record = ledger.get_model_metadata("alexnet").await.unwrap().unwrap();
        assert_eq!(record.fields["architecture"], serde_json::json!("DCNN"));
        assert_eq!(record.fields["hugging_face_link"], serde_json::json!("https://hf.co/x"));
        assert_eq!(record.fields["model_size_mb"], serde_json::json!(233.1));
        assert!(!record.fields.contains_key("huggingface_link"));
    }

    #[tokio::test]
    async fn benchmark_meta_attached_and_updated_in_place() {
        let ledger = Arc::new(MemoryLedger::new());
        ledger
            .get_or_create_benchmark_type("MajajHong2015.IT-pls", "vision")
            .await
            .unwrap();
        ledger
            .get_or_create_benchmark_instance("MajajHong2015.IT-pls", 1)
            .await
            .unwrap();
        ledger
            .get_or_create_benchmark_instance("MajajHong2015.IT-pls", 2)
            .await
            .unwrap();
        let endpoint = MetadataEndpoint::new(ledger.clone());

        let data = mapping(
            "benchmarks:\n  MajajHong2015.IT-pls:\n    stimulus_set:\n      num_stimuli: 3200\n    data:\n      region: IT\n    metric:\n      type: pls\n",
        );
        endpoint.persist(PluginType::Benchmarks, &data).await.unwrap();

        let instances = ledger.benchmark_instances("MajajHong2015.IT-pls").await.unwrap();
        let stimuli_id = instances[0].stimuli_meta_id.clone().unwrap();
        assert!(instances.iter().all(|i| i.stimuli_meta_id.as_deref() == Some(stimuli_id.as_str())));
        let metric = ledger
            .get_benchmark_meta(MetaKind::Metric, instances[0].metric_meta_id.as_deref().unwrap())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(metric.fields["public"], serde_json::json!(false));

        let updated = mapping(
            "benchmarks:\n  MajajHong2015.IT-pls:\n    stimulus_set:\n      num_stimuli: 640\n",
        );
        endpoint.persist(PluginType::Benchmarks, &updated).await.unwrap();
        let instances = ledger.benchmark_instances("MajajHong2015.IT-pls").await.unwrap();
        assert_eq!(instances[0].stimuli_meta_id.as_deref(), Some(stimuli_id.as_str()));
        let stimuli = ledger
            .get_benchmark_meta(MetaKind::Stimuli, &stimuli_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stimuli.fields["num_stimuli"], serde_json::json!(640));
    }

    #[tokio::test]
    async fn missing_section_writes_nothing() {
        let endpoint = MetadataEndpoint::new(Arc::new(MemoryLedger::new()));
        let data = mapping("benchmarks: {}\n");
        assert_eq!(endpoint.persist(PluginType::Models, &data).await.unwrap(), 0);
    }
}
