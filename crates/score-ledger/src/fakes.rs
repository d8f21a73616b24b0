//! In-memory fake for the ledger trait (testing only)
//!
//! `MemoryLedger` satisfies the `SubmissionLedger` contract without any
//! external dependencies.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::StorageError;
use crate::ledger::*;

#[derive(Debug, Default)]
struct Tables {
    submissions: HashMap<String, SubmissionRecord>,
    models: Vec<ModelRecord>,
    benchmark_types: HashMap<String, BenchmarkTypeRecord>,
    instances: Vec<BenchmarkInstanceRecord>,
    scores: Vec<ScoreRecord>,
    model_meta: HashMap<String, ModelMetadataRecord>,
    benchmark_meta: HashMap<(MetaKind, String), BenchmarkMetaRecord>,
}

/// In-memory ledger backed by `HashMap`s and `Vec`s behind a `Mutex`.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    tables: Mutex<Tables>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of score rows (all models)
    pub fn score_count(&self) -> usize {
        self.tables.lock().unwrap().scores.len()
    }

    /// Insert a benchmark type directly, e.g. a parent that already exists.
    pub fn seed_benchmark_type(&self, record: BenchmarkTypeRecord) {
        self.tables
            .lock()
            .unwrap()
            .benchmark_types
            .insert(record.identifier.clone(), record);
    }
}

#[async_trait]
impl SubmissionLedger for MemoryLedger {
    async fn create_submission(&self, meta: &SubmissionMeta) -> StorageResult<SubmissionRecord> {
        let record = SubmissionRecord {
            submission_id: meta.submission_id.clone(),
            submitter: meta.submitter.clone(),
            model_type: meta.model_type.clone(),
            status: SubmissionStatus::Running,
            timestamp: Utc::now(),
        };
        self.tables
            .lock()
            .unwrap()
            .submissions
            .insert(record.submission_id.clone(), record.clone());
        Ok(record)
    }

    async fn set_submission_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        let record = tables
            .submissions
            .get_mut(submission_id)
            .ok_or_else(|| StorageError::NotFound {
                kind: "submission",
                id: submission_id.to_string(),
            })?;
        record.status = status;
        Ok(())
    }

    async fn get_submission(&self, submission_id: &str) -> StorageResult<SubmissionRecord> {
        self.tables
            .lock()
            .unwrap()
            .submissions
            .get(submission_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound {
                kind: "submission",
                id: submission_id.to_string(),
            })
    }

    async fn get_or_create_model(&self, model: &NewModel) -> StorageResult<(ModelRecord, bool)> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .models
            .iter()
            .find(|m| m.name == model.name && m.owner == model.owner)
        {
            return Ok((existing.clone(), false));
        }
        let record = ModelRecord {
            model_id: Uuid::new_v4().to_string(),
            name: model.name.clone(),
            owner: model.owner.clone(),
            submission_id: model.submission_id.clone(),
            domain: model.domain.clone(),
            public: model.public,
            competition: model.competition.clone(),
            reference: model.reference.clone(),
        };
        tables.models.push(record.clone());
        Ok((record, true))
    }

    async fn get_benchmark_type(
        &self,
        identifier: &str,
    ) -> StorageResult<Option<BenchmarkTypeRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .benchmark_types
            .get(identifier)
            .cloned())
    }

    async fn get_or_create_benchmark_type(
        &self,
        identifier: &str,
        domain: &str,
    ) -> StorageResult<(BenchmarkTypeRecord, bool)> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.benchmark_types.get(identifier) {
            return Ok((existing.clone(), false));
        }
        let record = BenchmarkTypeRecord {
            identifier: identifier.to_string(),
            order: DEFAULT_BENCHMARK_ORDER,
            parent: None,
            domain: domain.to_string(),
            reference: None,
        };
        tables
            .benchmark_types
            .insert(identifier.to_string(), record.clone());
        Ok((record, true))
    }

    async fn update_benchmark_type(&self, record: &BenchmarkTypeRecord) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables.benchmark_types.get_mut(&record.identifier) {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                kind: "benchmark type",
                id: record.identifier.clone(),
            }),
        }
    }

    async fn get_or_create_benchmark_instance(
        &self,
        benchmark_type: &str,
        version: i64,
    ) -> StorageResult<(BenchmarkInstanceRecord, bool)> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables
            .instances
            .iter()
            .find(|i| i.benchmark_type == benchmark_type && i.version == version)
        {
            return Ok((existing.clone(), false));
        }
        let record = BenchmarkInstanceRecord {
            instance_id: Uuid::new_v4().to_string(),
            benchmark_type: benchmark_type.to_string(),
            version,
            ceiling: None,
            ceiling_error: None,
            stimuli_meta_id: None,
            data_meta_id: None,
            metric_meta_id: None,
        };
        tables.instances.push(record.clone());
        Ok((record, true))
    }

    async fn update_benchmark_instance(
        &self,
        record: &BenchmarkInstanceRecord,
    ) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables
            .instances
            .iter_mut()
            .find(|i| i.instance_id == record.instance_id)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                kind: "benchmark instance",
                id: record.instance_id.clone(),
            }),
        }
    }

    async fn benchmark_instances(
        &self,
        benchmark_type: &str,
    ) -> StorageResult<Vec<BenchmarkInstanceRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .instances
            .iter()
            .filter(|i| i.benchmark_type == benchmark_type)
            .cloned()
            .collect())
    }

    async fn get_or_create_score(
        &self,
        benchmark_instance_id: &str,
        model_id: &str,
        start_timestamp: DateTime<Utc>,
    ) -> StorageResult<(ScoreRecord, bool)> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(existing) = tables.scores.iter().find(|s| {
            s.benchmark_instance_id == benchmark_instance_id && s.model_id == model_id
        }) {
            return Ok((existing.clone(), false));
        }
        let record = ScoreRecord {
            score_id: Uuid::new_v4().to_string(),
            benchmark_instance_id: benchmark_instance_id.to_string(),
            model_id: model_id.to_string(),
            score_raw: None,
            score_ceiled: None,
            error: None,
            comment: None,
            start_timestamp: Some(start_timestamp),
            end_timestamp: None,
        };
        tables.scores.push(record.clone());
        Ok((record, true))
    }

    async fn update_score(&self, record: &ScoreRecord) -> StorageResult<()> {
        let mut tables = self.tables.lock().unwrap();
        match tables
            .scores
            .iter_mut()
            .find(|s| s.score_id == record.score_id)
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(())
            }
            None => Err(StorageError::NotFound {
                kind: "score",
                id: record.score_id.clone(),
            }),
        }
    }

    async fn scores_for_model(&self, model_id: &str) -> StorageResult<Vec<ScoreRecord>> {
        let tables = self.tables.lock().unwrap();
        Ok(tables
            .scores
            .iter()
            .filter(|s| s.model_id == model_id)
            .cloned()
            .collect())
    }

    async fn upsert_model_metadata(&self, record: &ModelMetadataRecord) -> StorageResult<()> {
        self.tables
            .lock()
            .unwrap()
            .model_meta
            .insert(record.model_name.clone(), record.clone());
        Ok(())
    }

    async fn get_model_metadata(
        &self,
        model_name: &str,
    ) -> StorageResult<Option<ModelMetadataRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .model_meta
            .get(model_name)
            .cloned())
    }

    async fn upsert_benchmark_meta(
        &self,
        kind: MetaKind,
        existing_id: Option<&str>,
        fields: &MetaFields,
    ) -> StorageResult<String> {
        let mut tables = self.tables.lock().unwrap();
        if let Some(id) = existing_id {
            if let Some(existing) = tables.benchmark_meta.get_mut(&(kind, id.to_string())) {
                existing.fields = fields.clone();
                return Ok(id.to_string());
            }
        }
        let meta_id = Uuid::new_v4().to_string();
        tables.benchmark_meta.insert(
            (kind, meta_id.clone()),
            BenchmarkMetaRecord {
                meta_id: meta_id.clone(),
                kind,
                fields: fields.clone(),
            },
        );
        Ok(meta_id)
    }

    async fn get_benchmark_meta(
        &self,
        kind: MetaKind,
        meta_id: &str,
    ) -> StorageResult<Option<BenchmarkMetaRecord>> {
        Ok(self
            .tables
            .lock()
            .unwrap()
            .benchmark_meta
            .get(&(kind, meta_id.to_string()))
            .cloned())
    }
}
