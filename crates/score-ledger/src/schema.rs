//! Database row types for records carrying timestamps
//!
//! Timestamps are stored as native SurrealDB datetimes so they sort and
//! compare server-side; the ledger converts at the boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::ledger::{ScoreRecord, SubmissionRecord};

mod surreal_datetime {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&SurrealDatetime::from(*date), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(DateTime::from(SurrealDatetime::deserialize(deserializer)?))
    }
}

mod surreal_datetime_opt {
    use chrono::{DateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};
    use surrealdb::sql::Datetime as SurrealDatetime;

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serde::Serialize::serialize(&date.map(SurrealDatetime::from), serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(Option::<SurrealDatetime>::deserialize(deserializer)?.map(DateTime::from))
    }
}

/// `submissions` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionRow {
    pub submission_id: String,
    pub submitter: String,
    pub model_type: String,
    /// "running" | "successful" | "failure"
    pub status: String,
    #[serde(with = "surreal_datetime")]
    pub timestamp: DateTime<Utc>,
}

impl From<&SubmissionRecord> for SubmissionRow {
    fn from(record: &SubmissionRecord) -> Self {
        Self {
            submission_id: record.submission_id.clone(),
            submitter: record.submitter.clone(),
            model_type: record.model_type.clone(),
            status: record.status.as_str().to_string(),
            timestamp: record.timestamp,
        }
    }
}

impl TryFrom<SubmissionRow> for SubmissionRecord {
    type Error = StorageError;

    fn try_from(row: SubmissionRow) -> Result<Self, Self::Error> {
        Ok(Self {
            submission_id: row.submission_id,
            submitter: row.submitter,
            model_type: row.model_type,
            status: row.status.parse()?,
            timestamp: row.timestamp,
        })
    }
}

/// `scores` row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreRow {
    pub score_id: String,
    pub benchmark_instance_id: String,
    pub model_id: String,
    pub score_raw: Option<f64>,
    pub score_ceiled: Option<f64>,
    pub error: Option<f64>,
    pub comment: Option<String>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub start_timestamp: Option<DateTime<Utc>>,
    #[serde(default, with = "surreal_datetime_opt")]
    pub end_timestamp: Option<DateTime<Utc>>,
}

impl From<&ScoreRecord> for ScoreRow {
    fn from(record: &ScoreRecord) -> Self {
        Self {
            score_id: record.score_id.clone(),
            benchmark_instance_id: record.benchmark_instance_id.clone(),
            model_id: record.model_id.clone(),
            score_raw: record.score_raw,
            score_ceiled: record.score_ceiled,
            error: record.error,
            comment: record.comment.clone(),
            start_timestamp: record.start_timestamp,
            end_timestamp: record.end_timestamp,
        }
    }
}

impl From<ScoreRow> for ScoreRecord {
    fn from(row: ScoreRow) -> Self {
        Self {
            score_id: row.score_id,
            benchmark_instance_id: row.benchmark_instance_id,
            model_id: row.model_id,
            score_raw: row.score_raw,
            score_ceiled: row.score_ceiled,
            error: row.error,
            comment: row.comment,
            start_timestamp: row.start_timestamp,
            end_timestamp: row.end_timestamp,
        }
    }
}
