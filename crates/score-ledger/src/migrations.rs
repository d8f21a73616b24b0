//! SurrealDB schema initialization
//!
//! Safe to call on every connection (idempotent).

use crate::Result;
use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

/// Define all ledger tables and indexes
pub async fn init_schema(db: &Surreal<Any>) -> Result<()> {
    info!("Initializing Brain-Score ledger schema");

    init_submissions_table(db).await?;
    init_models_table(db).await?;
    init_benchmark_tables(db).await?;
    init_scores_table(db).await?;
    init_metadata_tables(db).await?;

    info!("Ledger schema initialization complete");
    Ok(())
}

async fn run(db: &Surreal<Any>, table: &str, sql: &'static str) -> Result<()> {
    debug!(table, "Initializing table");
    db.query(sql)
        .await?
        .check()
        .map_err(|e| crate::StateError::SchemaSetup(format!("{table}: {e}")))?;
    Ok(())
}

/// `submissions`: one row per CI submission, status running -> successful | failure
async fn init_submissions_table(db: &Surreal<Any>) -> Result<()> {
    run(
        db,
        "submissions",
        r#"
        DEFINE TABLE IF NOT EXISTS submissions SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_submission_id ON TABLE submissions COLUMNS submission_id UNIQUE;
        "#,
    )
    .await
}

/// `models`: unique per (name, owner)
async fn init_models_table(db: &Surreal<Any>) -> Result<()> {
    run(
        db,
        "models",
        r#"
        DEFINE TABLE IF NOT EXISTS models SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_model_id ON TABLE models COLUMNS model_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_model_name_owner ON TABLE models COLUMNS name, owner UNIQUE;
        "#,
    )
    .await
}

/// `benchmark_types` keyed by identifier; `benchmark_instances` unique per
/// (benchmark_type, version)
async fn init_benchmark_tables(db: &Surreal<Any>) -> Result<()> {
    run(
        db,
        "benchmarks",
        r#"
        DEFINE TABLE IF NOT EXISTS benchmark_types SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_benchmark_identifier ON TABLE benchmark_types COLUMNS identifier UNIQUE;

        DEFINE TABLE IF NOT EXISTS benchmark_instances SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_instance_id ON TABLE benchmark_instances COLUMNS instance_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_instance_type_version ON TABLE benchmark_instances COLUMNS benchmark_type, version UNIQUE;
        "#,
    )
    .await
}

/// `scores`: unique per (benchmark_instance_id, model_id)
async fn init_scores_table(db: &Surreal<Any>) -> Result<()> {
    run(
        db,
        "scores",
        r#"
        DEFINE TABLE IF NOT EXISTS scores SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_score_id ON TABLE scores COLUMNS score_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_score_pair ON TABLE scores COLUMNS benchmark_instance_id, model_id UNIQUE;
        DEFINE INDEX IF NOT EXISTS idx_score_model ON TABLE scores COLUMNS model_id;
        "#,
    )
    .await
}

async fn init_metadata_tables(db: &Surreal<Any>) -> Result<()> {
    run(
        db,
        "metadata",
        r#"
        DEFINE TABLE IF NOT EXISTS model_meta SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_model_meta_name ON TABLE model_meta COLUMNS model_name UNIQUE;

        DEFINE TABLE IF NOT EXISTS benchmark_stimuli_meta SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_stimuli_meta_id ON TABLE benchmark_stimuli_meta COLUMNS meta_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS benchmark_data_meta SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_data_meta_id ON TABLE benchmark_data_meta COLUMNS meta_id UNIQUE;

        DEFINE TABLE IF NOT EXISTS benchmark_metric_meta SCHEMALESS;
        DEFINE INDEX IF NOT EXISTS idx_metric_meta_id ON TABLE benchmark_metric_meta COLUMNS meta_id UNIQUE;
        "#,
    )
    .await
}
