//! SurrealDB-backed SubmissionLedger implementation
//!
//! Records are stored without SurrealDB record ids leaking into the domain
//! types: rows carry their own `*_id` columns and every select omits `id`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{StateError, StorageError};
use crate::ledger::*;
use crate::migrations;
use crate::schema::{ScoreRow, SubmissionRow};

const NAMESPACE: &str = "brainscore";
const DATABASE: &str = "main";

/// SurrealDB-backed implementation of [`SubmissionLedger`].
pub struct SurrealLedger {
    db: Surreal<Any>,
}

impl SurrealLedger {
    /// Create an in-memory instance for testing.
    pub async fn in_memory() -> crate::Result<Self> {
        Self::connect("mem://").await
    }

    /// Connect to `endpoint` (`mem://`, `surrealkv://path`, `ws://host:port`),
    /// select `brainscore/main` and run migrations.
    ///
    /// Root credentials are read from `SURREALDB_USER` / `SURREALDB_PASS`
    /// when both are set.
    pub async fn connect(endpoint: &str) -> crate::Result<Self> {
        let db = surrealdb::engine::any::connect(endpoint)
            .await
            .map_err(|e| StateError::Connection(format!("{endpoint}: {e}")))?;

        if let (Ok(username), Ok(password)) = (
            std::env::var("SURREALDB_USER"),
            std::env::var("SURREALDB_PASS"),
        ) {
            use surrealdb::opt::auth::Root;
            db.signin(Root {
                username: &username,
                password: &password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("Root auth failed: {e}")))?;
        }

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!(endpoint, "SurrealLedger connected");
        Ok(Self { db })
    }

    /// Connect using `BSC_DATABASESECRET`, then `SURREALDB_URL`, falling back
    /// to local persistence under `.brainscore/db`.
    pub async fn from_env() -> crate::Result<Self> {
        for var in ["BSC_DATABASESECRET", "SURREALDB_URL"] {
            if let Ok(endpoint) = std::env::var(var) {
                if !endpoint.is_empty() {
                    return Self::connect(&endpoint).await;
                }
            }
        }

        let path = ".brainscore/db";
        std::fs::create_dir_all(path).map_err(|e| {
            StateError::Connection(format!(
                "Failed to create database directory {}: {}",
                path, e
            ))
        })?;
        info!("No database secret or SURREALDB_URL found, using local persistence");
        Self::connect(&format!("surrealkv://{}", path)).await
    }

    // -- private helpers -----------------------------------------------------

    async fn select<T: DeserializeOwned>(
        &self,
        sql: &'static str,
        binds: Vec<(&'static str, Value)>,
    ) -> StorageResult<Vec<T>> {
        let mut query = self.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut res = query.await?.check()?;
        Ok(res.take(0)?)
    }

    async fn select_one<T: DeserializeOwned>(
        &self,
        sql: &'static str,
        binds: Vec<(&'static str, Value)>,
    ) -> StorageResult<Option<T>> {
        Ok(self.select(sql, binds).await?.into_iter().next())
    }

    async fn create<T: Serialize + 'static>(&self, table: &'static str, row: T) -> StorageResult<()> {
        debug!(table, "Creating row");
        self.db
            .query("CREATE type::table($tb) CONTENT $row RETURN NONE")
            .bind(("tb", table))
            .bind(("row", row))
            .await?
            .check()?;
        Ok(())
    }

    async fn execute(
        &self,
        sql: &'static str,
        binds: Vec<(&'static str, Value)>,
    ) -> StorageResult<()> {
        let mut query = self.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        query.await?.check()?;
        Ok(())
    }

    fn to_value<T: Serialize>(row: &T) -> StorageResult<Value> {
        serde_json::to_value(row).map_err(|e| StorageError::Backend(e.to_string()))
    }
}

#[async_trait]
impl SubmissionLedger for SurrealLedger {
    async fn create_submission(&self, meta: &SubmissionMeta) -> StorageResult<SubmissionRecord> {
        let record = SubmissionRecord {
            submission_id: meta.submission_id.clone(),
            submitter: meta.submitter.clone(),
            model_type: meta.model_type.clone(),
            status: SubmissionStatus::Running,
            timestamp: Utc::now(),
        };
        self.create("submissions", SubmissionRow::from(&record))
            .await?;
        Ok(record)
    }

    async fn set_submission_status(
        &self,
        submission_id: &str,
        status: SubmissionStatus,
    ) -> StorageResult<()> {
        self.get_submission(submission_id).await?;
        self.execute(
            "UPDATE submissions SET status = $status WHERE submission_id = $sid RETURN NONE",
            vec![
                ("status", json!(status.as_str())),
                ("sid", json!(submission_id)),
            ],
        )
        .await
    }

    async fn get_submission(&self, submission_id: &str) -> StorageResult<SubmissionRecord> {
        let row: Option<SubmissionRow> = self
            .select_one(
                "SELECT * OMIT id FROM submissions WHERE submission_id = $sid",
                vec![("sid", json!(submission_id))],
            )
            .await?;
        row.ok_or_else(|| StorageError::NotFound {
            kind: "submission",
            id: submission_id.to_string(),
        })?
        .try_into()
    }

    async fn get_or_create_model(&self, model: &NewModel) -> StorageResult<(ModelRecord, bool)> {
        let existing: Option<ModelRecord> = self
            .select_one(
                "SELECT * OMIT id FROM models WHERE name = $name AND owner = $owner",
                vec![("name", json!(model.name)), ("owner", json!(model.owner))],
            )
            .await?;
        if let Some(record) = existing {
            return Ok((record, false));
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
        self.create("models", record.clone()).await?;
        Ok((record, true))
    }

    async fn get_benchmark_type(
        &self,
        identifier: &str,
    ) -> StorageResult<Option<BenchmarkTypeRecord>> {
        self.select_one(
            "SELECT * OMIT id FROM benchmark_types WHERE identifier = $identifier",
            vec![("identifier", json!(identifier))],
        )
        .await
    }

    async fn get_or_create_benchmark_type(
        &self,
        identifier: &str,
        domain: &str,
    ) -> StorageResult<(BenchmarkTypeRecord, bool)> {
        if let Some(record) = self.get_benchmark_type(identifier).await? {
            return Ok((record, false));
        }
        let record = BenchmarkTypeRecord {
            identifier: identifier.to_string(),
            order: DEFAULT_BENCHMARK_ORDER,
            parent: None,
            domain: domain.to_string(),
            reference: None,
        };
        self.create("benchmark_types", record.clone()).await?;
        Ok((record, true))
    }

    async fn update_benchmark_type(&self, record: &BenchmarkTypeRecord) -> StorageResult<()> {
        if self.get_benchmark_type(&record.identifier).await?.is_none() {
            return Err(StorageError::NotFound {
                kind: "benchmark type",
                id: record.identifier.clone(),
            });
        }
        self.execute(
            "UPDATE benchmark_types CONTENT $row WHERE identifier = $identifier RETURN NONE",
            vec![
                ("row", Self::to_value(record)?),
                ("identifier", json!(record.identifier)),
            ],
        )
        .await
    }

    async fn get_or_create_benchmark_instance(
        &self,
        benchmark_type: &str,
        version: i64,
    ) -> StorageResult<(BenchmarkInstanceRecord, bool)> {
        let existing: Option<BenchmarkInstanceRecord> = self
            .select_one(
                "SELECT * OMIT id FROM benchmark_instances WHERE benchmark_type = $bt AND version = $version",
                vec![("bt", json!(benchmark_type)), ("version", json!(version))],
            )
            .await?;
        if let Some(record) = existing {
            return Ok((record, false));
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
        self.create("benchmark_instances", record.clone()).await?;
        Ok((record, true))
    }

    async fn update_benchmark_instance(
        &self,
        record: &BenchmarkInstanceRecord,
    ) -> StorageResult<()> {
        let existing: Option<BenchmarkInstanceRecord> = self
            .select_one(
                "SELECT * OMIT id FROM benchmark_instances WHERE instance_id = $iid",
                vec![("iid", json!(record.instance_id))],
            )
            .await?;
        if existing.is_none() {
            return Err(StorageError::NotFound {
                kind: "benchmark instance",
                id: record.instance_id.clone(),
            });
        }
        self.execute(
            "UPDATE benchmark_instances CONTENT $row WHERE instance_id = $iid RETURN NONE",
            vec![
                ("row", Self::to_value(record)?),
                ("iid", json!(record.instance_id)),
            ],
        )
        .await
    }

    async fn benchmark_instances(
        &self,
        benchmark_type: &str,
    ) -> StorageResult<Vec<BenchmarkInstanceRecord>> {
        self.select(
            "SELECT * OMIT id FROM benchmark_instances WHERE benchmark_type = $bt ORDER BY version ASC",
            vec![("bt", json!(benchmark_type))],
        )
        .await
    }

    async fn get_or_create_score(
        &self,
        benchmark_instance_id: &str,
        model_id: &str,
        start_timestamp: DateTime<Utc>,
    ) -> StorageResult<(ScoreRecord, bool)> {
        let existing: Option<ScoreRow> = self
            .select_one(
                "SELECT * OMIT id FROM scores WHERE benchmark_instance_id = $iid AND model_id = $mid",
                vec![("iid", json!(benchmark_instance_id)), ("mid", json!(model_id))],
            )
            .await?;
        if let Some(row) = existing {
            return Ok((row.into(), false));
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
        self.create("scores", ScoreRow::from(&record)).await?;
        Ok((record, true))
    }

    async fn update_score(&self, record: &ScoreRecord) -> StorageResult<()> {
        let existing: Option<ScoreRow> = self
            .select_one(
                "SELECT * OMIT id FROM scores WHERE score_id = $sid",
                vec![("sid", json!(record.score_id))],
            )
            .await?;
        if existing.is_none() {
            return Err(StorageError::NotFound {
                kind: "score",
                id: record.score_id.clone(),
            });
        }
        let row = ScoreRow::from(record);
        let score_id = record.score_id.clone();
        self.db
            .query("UPDATE scores CONTENT $row WHERE score_id = $sid RETURN NONE")
            .bind(("row", row))
            .bind(("sid", score_id))
            .await?
            .check()?;
        Ok(())
    }

    async fn scores_for_model(&self, model_id: &str) -> StorageResult<Vec<ScoreRecord>> {
        let rows: Vec<ScoreRow> = self
            .select(
                "SELECT * OMIT id FROM scores WHERE model_id = $mid",
                vec![("mid", json!(model_id))],
            )
            .await?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn upsert_model_metadata(&self, record: &ModelMetadataRecord) -> StorageResult<()> {
        if self.get_model_metadata(&record.model_name).await?.is_some() {
            self.execute(
                "UPDATE model_meta CONTENT $row WHERE model_name = $name RETURN NONE",
                vec![
                    ("row", Self::to_value(record)?),
                    ("name", json!(record.model_name)),
                ],
            )
            .await
        } else {
            self.create("model_meta", record.clone()).await
        }
    }

    async fn get_model_metadata(
        &self,
        model_name: &str,
    ) -> StorageResult<Option<ModelMetadataRecord>> {
        self.select_one(
            "SELECT * OMIT id FROM model_meta WHERE model_name = $name",
            vec![("name", json!(model_name))],
        )
        .await
    }

    async fn upsert_benchmark_meta(
        &self,
        kind: MetaKind,
        existing_id: Option<&str>,
        fields: &MetaFields,
    ) -> StorageResult<String> {
        if let Some(id) = existing_id {
            if self.get_benchmark_meta(kind, id).await?.is_some() {
                self.execute(
                    "UPDATE type::table($tb) SET fields = $fields WHERE meta_id = $mid RETURN NONE",
                    vec![
                        ("tb", json!(kind.table())),
                        ("fields", Self::to_value(fields)?),
                        ("mid", json!(id)),
                    ],
                )
                .await?;
                debug!(kind = %kind, meta_id = id, "Updated benchmark metadata");
                return Ok(id.to_string());
            }
        }
        let record = BenchmarkMetaRecord {
            meta_id: Uuid::new_v4().to_string(),
            kind,
            fields: fields.clone(),
        };
        self.create(kind.table(), record.clone()).await?;
        debug!(kind = %kind, meta_id = %record.meta_id, "Created benchmark metadata");
        Ok(record.meta_id)
    }

    async fn get_benchmark_meta(
        &self,
        kind: MetaKind,
        meta_id: &str,
    ) -> StorageResult<Option<BenchmarkMetaRecord>> {
        self.select_one(
            "SELECT * OMIT id FROM type::table($tb) WHERE meta_id = $mid",
            vec![("tb", json!(kind.table())), ("mid", json!(meta_id))],
        )
        .await
    }
}
