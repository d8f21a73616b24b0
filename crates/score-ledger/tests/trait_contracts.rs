//! Contract tests for SubmissionLedger.
//!
//! Every check runs against the in-memory fake and the SurrealDB backend
//! (`mem://`); any conforming implementation must pass them.

use chrono::Utc;
use score_ledger::fakes::MemoryLedger;
use score_ledger::*;
use serde_json::json;

fn submission(id: &str) -> SubmissionMeta {
    SubmissionMeta {
        submission_id: id.to_string(),
        submitter: "user-1".to_string(),
        model_type: "artificialsubject".to_string(),
        public: true,
        competition: None,
    }
}

fn new_model(name: &str) -> NewModel {
    NewModel {
        name: name.to_string(),
        owner: "user-1".to_string(),
        submission_id: "42".to_string(),
        domain: "vision".to_string(),
        public: true,
        competition: None,
        reference: None,
    }
}

async fn surreal() -> SurrealLedger {
    SurrealLedger::in_memory().await.expect("in-memory surreal")
}

// ===========================================================================
// Submissions
// ===========================================================================

async fn check_submission_lifecycle(ledger: &dyn SubmissionLedger) {
    let created = ledger.create_submission(&submission("42")).await.unwrap();
    assert_eq!(created.status, SubmissionStatus::Running);

    ledger
        .set_submission_status("42", SubmissionStatus::Successful)
        .await
        .unwrap();
    let fetched = ledger.get_submission("42").await.unwrap();
    assert_eq!(fetched.status, SubmissionStatus::Successful);
    assert_eq!(fetched.submitter, "user-1");
}

async fn check_missing_submission(ledger: &dyn SubmissionLedger) {
    let err = ledger.get_submission("nope").await.unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
    let err = ledger
        .set_submission_status("nope", SubmissionStatus::Failure)
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::NotFound { .. }));
}

#[tokio::test]
async fn memory_submission_lifecycle() {
    check_submission_lifecycle(&MemoryLedger::new()).await;
    check_missing_submission(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn surreal_submission_lifecycle() {
    check_submission_lifecycle(&surreal().await).await;
    check_missing_submission(&surreal().await).await;
}

// ===========================================================================
// Models and benchmarks
// ===========================================================================

async fn check_get_or_create_model(ledger: &dyn SubmissionLedger) {
    let (first, created) = ledger.get_or_create_model(&new_model("alexnet")).await.unwrap();
    assert!(created);
    let (second, created) = ledger.get_or_create_model(&new_model("alexnet")).await.unwrap();
    assert!(!created);
    assert_eq!(first.model_id, second.model_id);

    let (other, created) = ledger.get_or_create_model(&new_model("pixels")).await.unwrap();
    assert!(created);
    assert_ne!(other.model_id, first.model_id);
}

async fn check_benchmark_type_and_instance(ledger: &dyn SubmissionLedger) {
    let (bt, created) = ledger
        .get_or_create_benchmark_type("MajajHong2015.IT-pls", "vision")
        .await
        .unwrap();
    assert!(created);
    assert_eq!(bt.order, DEFAULT_BENCHMARK_ORDER);
    assert!(ledger
        .get_or_create_benchmark_type("MajajHong2015.IT-pls", "vision")
        .await
        .map(|(_, created)| !created)
        .unwrap());

    let (mut instance, created) = ledger
        .get_or_create_benchmark_instance("MajajHong2015.IT-pls", 1)
        .await
        .unwrap();
    assert!(created);
    instance.ceiling = Some(0.82);
    instance.ceiling_error = Some(0.01);
    ledger.update_benchmark_instance(&instance).await.unwrap();

    let (again, created) = ledger
        .get_or_create_benchmark_instance("MajajHong2015.IT-pls", 1)
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.ceiling, Some(0.82));

    ledger
        .get_or_create_benchmark_instance("MajajHong2015.IT-pls", 2)
        .await
        .unwrap();
    let instances = ledger.benchmark_instances("MajajHong2015.IT-pls").await.unwrap();
    assert_eq!(instances.len(), 2);
}

#[tokio::test]
async fn memory_models_and_benchmarks() {
    let ledger = MemoryLedger::new();
    check_get_or_create_model(&ledger).await;
    check_benchmark_type_and_instance(&ledger).await;
}

#[tokio::test]
async fn surreal_models_and_benchmarks() {
    let ledger = surreal().await;
    check_get_or_create_model(&ledger).await;
    check_benchmark_type_and_instance(&ledger).await;
}

// ===========================================================================
// Scores
// ===========================================================================

async fn check_score_get_or_create_and_update(ledger: &dyn SubmissionLedger) {
    let (mut score, created) = ledger
        .get_or_create_score("instance-1", "model-1", Utc::now())
        .await
        .unwrap();
    assert!(created);
    assert!(score.score_raw.is_none());

    score.score_raw = Some(0.5);
    score.score_ceiled = Some(0.6);
    score.end_timestamp = Some(Utc::now());
    ledger.update_score(&score).await.unwrap();

    let (again, created) = ledger
        .get_or_create_score("instance-1", "model-1", Utc::now())
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(again.score_id, score.score_id);
    assert_eq!(again.score_raw, Some(0.5));
    assert!(again.end_timestamp.is_some());

    let scores = ledger.scores_for_model("model-1").await.unwrap();
    assert_eq!(scores.len(), 1);
}

#[tokio::test]
async fn memory_scores() {
    check_score_get_or_create_and_update(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn surreal_scores() {
    check_score_get_or_create_and_update(&surreal().await).await;
}

// ===========================================================================
// Metadata
// ===========================================================================

async fn check_metadata_upserts(ledger: &dyn SubmissionLedger) {
    let mut fields = MetaFields::new();
    fields.insert("architecture".into(), json!("DCNN"));
    let record = ModelMetadataRecord {
        model_name: "alexnet".into(),
        fields,
    };
    ledger.upsert_model_metadata(&record).await.unwrap();

    let mut updated = record.clone();
    updated.fields.insert("total_layers".into(), json!(8));
    ledger.upsert_model_metadata(&updated).await.unwrap();
    let stored = ledger.get_model_metadata("alexnet").await.unwrap().unwrap();
    assert_eq!(stored.fields.get("total_layers"), Some(&json!(8)));

    let mut stimuli = MetaFields::new();
    stimuli.insert("num_stimuli".into(), json!(3200));
    let id = ledger
        .upsert_benchmark_meta(MetaKind::Stimuli, None, &stimuli)
        .await
        .unwrap();

    stimuli.insert("num_stimuli".into(), json!(640));
    let same = ledger
        .upsert_benchmark_meta(MetaKind::Stimuli, Some(&id), &stimuli)
        .await
        .unwrap();
    assert_eq!(id, same);
    let stored = ledger
        .get_benchmark_meta(MetaKind::Stimuli, &id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.fields.get("num_stimuli"), Some(&json!(640)));

    let fresh = ledger
        .upsert_benchmark_meta(MetaKind::Data, Some("missing-id"), &MetaFields::new())
        .await
        .unwrap();
    assert_ne!(fresh, "missing-id");
    assert!(ledger
        .get_benchmark_meta(MetaKind::Stimuli, &fresh)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn memory_metadata() {
    check_metadata_upserts(&MemoryLedger::new()).await;
}

#[tokio::test]
async fn surreal_metadata() {
    check_metadata_upserts(&surreal().await).await;
}
