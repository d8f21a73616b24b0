//! Ledger trait and record types
//!
//! `SubmissionLedger` covers everything the scoring and metadata endpoints
//! persist: submissions, models, benchmark types and instances, scores, and
//! model/benchmark metadata. Lookups follow a get-or-create pattern and
//! return whether the row was newly created.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;

/// Result type for ledger operations
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Free-form metadata fields keyed by column name
pub type MetaFields = BTreeMap<String, serde_json::Value>;

/// Default display order of newly created benchmark types
pub const DEFAULT_BENCHMARK_ORDER: i64 = 999;

// ---------------------------------------------------------------------------
// Submissions
// ---------------------------------------------------------------------------

/// Submission status: running -> successful | failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Running,
    Successful,
    Failure,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Running => "running",
            SubmissionStatus::Successful => "successful",
            SubmissionStatus::Failure => "failure",
        }
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubmissionStatus {
    type Err = StorageError;

    fn from_str(s: &str) -> StorageResult<Self> {
        match s {
            "running" => Ok(SubmissionStatus::Running),
            "successful" => Ok(SubmissionStatus::Successful),
            "failure" => Ok(SubmissionStatus::Failure),
            other => Err(StorageError::InvalidStatus(other.to_string())),
        }
    }
}

/// Who submitted what
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionMeta {
    /// CI job identifier, used as the submission id
    pub submission_id: String,
    pub submitter: String,
    pub model_type: String,
    pub public: bool,
    pub competition: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub submission_id: String,
    pub submitter: String,
    pub model_type: String,
    pub status: SubmissionStatus,
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Models and benchmarks
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelRecord {
    pub model_id: String,
    pub name: String,
    pub owner: String,
    pub submission_id: String,
    pub domain: String,
    pub public: bool,
    pub competition: Option<String>,
    /// Raw bibtex of the model's reference, if known
    pub reference: Option<String>,
}

/// Values applied only when a model row is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewModel {
    pub name: String,
    pub owner: String,
    pub submission_id: String,
    pub domain: String,
    pub public: bool,
    pub competition: Option<String>,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BenchmarkTypeRecord {
    pub identifier: String,
    pub order: i64,
    pub parent: Option<String>,
    pub domain: String,
    pub reference: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkInstanceRecord {
    pub instance_id: String,
    pub benchmark_type: String,
    pub version: i64,
    pub ceiling: Option<f64>,
    pub ceiling_error: Option<f64>,
    pub stimuli_meta_id: Option<String>,
    pub data_meta_id: Option<String>,
    pub metric_meta_id: Option<String>,
}

impl BenchmarkInstanceRecord {
    /// Metadata id of the given kind referenced by this instance
    pub fn meta_id(&self, kind: MetaKind) -> Option<&str> {
        match kind {
            MetaKind::Stimuli => self.stimuli_meta_id.as_deref(),
            MetaKind::Data => self.data_meta_id.as_deref(),
            MetaKind::Metric => self.metric_meta_id.as_deref(),
        }
    }

    pub fn set_meta_id(&mut self, kind: MetaKind, id: String) {
        match kind {
            MetaKind::Stimuli => self.stimuli_meta_id = Some(id),
            MetaKind::Data => self.data_meta_id = Some(id),
            MetaKind::Metric => self.metric_meta_id = Some(id),
        }
    }
}

// ---------------------------------------------------------------------------
// Scores
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRecord {
    pub score_id: String,
    pub benchmark_instance_id: String,
    pub model_id: String,
    pub score_raw: Option<f64>,
    pub score_ceiled: Option<f64>,
    pub error: Option<f64>,
    /// Failure trace, shortened
    pub comment: Option<String>,
    pub start_timestamp: Option<DateTime<Utc>>,
    pub end_timestamp: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Metadata
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadataRecord {
    /// Model identifier the metadata describes
    pub model_name: String,
    pub fields: MetaFields,
}

/// Benchmark metadata sub-record kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetaKind {
    Stimuli,
    Data,
    Metric,
}

impl MetaKind {
    pub const ALL: [MetaKind; 3] = [MetaKind::Stimuli, MetaKind::Data, MetaKind::Metric];

    /// Backing table name
    pub fn table(&self) -> &'static str {
        match self {
            MetaKind::Stimuli => "benchmark_stimuli_meta",
            MetaKind::Data => "benchmark_data_meta",
            MetaKind::Metric => "benchmark_metric_meta",
        }
    }

    /// Columns stored for this kind
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            MetaKind::Stimuli => &[
                "num_stimuli",
                "datatype",
                "stimuli_subtype",
                "total_size_mb",
                "brainscore_link",
                "extra_notes",
            ],
            MetaKind::Data => &[
                "benchmark_type",
                "task",
                "region",
                "hemisphere",
                "num_recording_sites",
                "duration_ms",
                "species",
                "datatype",
                "num_subjects",
                "pre_processing",
                "brainscore_link",
                "extra_notes",
                "data_publicly_available",
            ],
            MetaKind::Metric => &["type", "reference", "public", "brainscore_link", "extra_notes"],
        }
    }
}

impl fmt::Display for MetaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MetaKind::Stimuli => "stimuli",
            MetaKind::Data => "data",
            MetaKind::Metric => "metric",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkMetaRecord {
    pub meta_id: String,
    pub kind: MetaKind,
    pub fields: MetaFields,
}

// ---------------------------------------------------------------------------
// SubmissionLedger
// ---------------------------------------------------------------------------

/// Persistence for submissions and their scores.
///
/// Get-or-create operations are not transactional; concurrent writers may
/// race on duplicate rows.
#[async_trait]
pub trait SubmissionLedger: Send + Sync {
    /// Create a submission in `running` state.
    async fn create_submission(&self, meta: &SubmissionMeta) -> StorageResult<SubmissionRecord>;

    async fn set_submission_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> StorageResult<()>;

    async fn get_submission(&self, submission_id: &str) -> StorageResult<SubmissionRecord>;

    /// Look up a model by name and owner, creating it from `model` if absent.
    async fn get_or_create_model(&self, model: &NewModel) -> StorageResult<(ModelRecord, bool)>;

    async fn get_benchmark_type(&self, identifier: &str)
        -> StorageResult<Option<BenchmarkTypeRecord>>;

    /// Look up a benchmark type, creating it with order
    /// [`DEFAULT_BENCHMARK_ORDER`] if absent.
    async fn get_or_create_benchmark_type(
        &self,
        identifier: &str,
        domain: &str,
    ) -> StorageResult<(BenchmarkTypeRecord, bool)>;

    async fn update_benchmark_type(&self, record: &BenchmarkTypeRecord) -> StorageResult<()>;

    async fn get_or_create_benchmark_instance(
        &self,
        benchmark_type: &str,
        version: i64,
    ) -> StorageResult<(BenchmarkInstanceRecord, bool)>;

    async fn update_benchmark_instance(&self, record: &BenchmarkInstanceRecord)
        -> StorageResult<()>;

    /// All instances (versions) of a benchmark type
    async fn benchmark_instances(
        &self,
        benchmark_type: &str,
    ) -> StorageResult<Vec<BenchmarkInstanceRecord>>;

    /// Look up the score row for an instance/model pair, creating it with
    /// `start_timestamp` if absent.
    async fn get_or_create_score(
        &self,
        benchmark_instance_id: &str,
        model_id: &str,
        start_timestamp: DateTime<Utc>,
    ) -> StorageResult<(ScoreRecord, bool)>;

    async fn update_score(&self, record: &ScoreRecord) -> StorageResult<()>;

    async fn scores_for_model(&self, model_id: &str) -> StorageResult<Vec<ScoreRecord>>;

    async fn upsert_model_metadata(&self, record: &ModelMetadataRecord) -> StorageResult<()>;

    async fn get_model_metadata(&self, model_name: &str)
        -> StorageResult<Option<ModelMetadataRecord>>;

    /// Update the record `existing_id` (when it exists) or create a new one.
    /// Returns the id of the written record.
    async fn upsert_benchmark_meta(
        &self,
        kind: MetaKind,
        existing_id: Option<&str>,
        fields: &MetaFields,
    ) -> StorageResult<String>;

    async fn get_benchmark_meta(
        &self,
        kind: MetaKind,
        meta_id: &str,
    ) -> StorageResult<Option<BenchmarkMetaRecord>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_strings() {
        for status in [
            SubmissionStatus::Running,
            SubmissionStatus::Successful,
            SubmissionStatus::Failure,
        ] {
            assert_eq!(status.as_str().parse::<SubmissionStatus>().unwrap(), status);
        }
        assert!("done".parse::<SubmissionStatus>().is_err());
    }

    #[test]
    fn test_instance_meta_ids() {
        let mut instance = BenchmarkInstanceRecord {
            instance_id: "i".into(),
            benchmark_type: "b".into(),
            version: 1,
            ceiling: None,
            ceiling_error: None,
            stimuli_meta_id: None,
            data_meta_id: None,
            metric_meta_id: None,
        };
        instance.set_meta_id(MetaKind::Data, "d1".into());
        assert_eq!(instance.meta_id(MetaKind::Data), Some("d1"));
        assert_eq!(instance.meta_id(MetaKind::Metric), None);
    }

    #[test]
    fn test_meta_kind_fields_are_distinct_tables() {
        assert_ne!(MetaKind::Stimuli.table(), MetaKind::Data.table());
        assert!(MetaKind::Metric.fields().contains(&"public"));
        assert!(MetaKind::Data.fields().contains(&"num_recording_sites"));
    }
}
