use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use brainscore_core::domain::{DomainPlugin, LoadedBenchmark, LoadedModel};
use brainscore_core::{BrainscoreError, Result, RunScoringEndpoint, Score};
use score_ledger::fakes::MemoryLedger;
use score_ledger::{
    BenchmarkTypeRecord, MetaFields, SubmissionLedger, SubmissionMeta, SubmissionStatus,
};

/// Domain returning fixed raw scores; benchmarks named `*-ceiled` carry a
/// ceiling of 0.8 and parent `neural`.
#[derive(Default)]
struct FixedDomain {
    scores: HashMap<(String, String), f64>,
    broken: HashSet<String>,
    score_calls: Mutex<usize>,
}

impl FixedDomain {
    fn with(mut self, model: &str, benchmark: &str, value: f64) -> Self {
        self.scores.insert((model.into(), benchmark.into()), value);
        self
    }

    fn broken(mut self, identifier: &str) -> Self {
        self.broken.insert(identifier.into());
        self
    }

    fn calls(&self) -> usize {
        *self.score_calls.lock().unwrap()
    }
}

#[async_trait]
impl DomainPlugin for FixedDomain {
    fn domain(&self) -> &str {
        "vision"
    }

    async fn load_model(&self, identifier: &str) -> Result<LoadedModel> {
        Ok(LoadedModel {
            identifier: identifier.into(),
            bibtex: Some(format!("@article{{{identifier}}}")),
            attributes: BTreeMap::new(),
        })
    }

    async fn load_benchmark(&self, identifier: &str) -> Result<LoadedBenchmark> {
        let ceiled = identifier.ends_with("-ceiled");
        Ok(LoadedBenchmark {
            identifier: identifier.into(),
            version: 1,
            parent: ceiled.then(|| "neural".to_string()),
            bibtex: None,
            ceiling: ceiled.then(|| Score::new(0.8).with_error(0.02)),
        })
    }

    async fn score(&self, model: &str, benchmark: &str) -> Result<Score> {
        *self.score_calls.lock().unwrap() += 1;
        if self.broken.contains(model) || self.broken.contains(benchmark) {
            return Err(BrainscoreError::Domain(format!(
                "scoring {model} on {benchmark} failed: {}",
                "x".repeat(2000)
            )));
        }
        let raw = Score::new(self.scores[&(model.to_string(), benchmark.to_string())]).with_error(0.1);
        let benchmark = self.load_benchmark(benchmark).await?;
        match benchmark.ceiling {
            Some(ceiling) => raw.ceiled(&ceiling),
            None => Ok(raw),
        }
    }

    async fn create_model_metadata(&self, _: &LoadedModel, _: &str) -> Result<MetaFields> {
        Ok(MetaFields::new())
    }

    async fn create_stimuli_metadata(&self, _: &LoadedBenchmark, _: &str) -> Result<MetaFields> {
        Ok(MetaFields::new())
    }

    async fn create_data_metadata(&self, _: &LoadedBenchmark, _: &str) -> Result<MetaFields> {
        Ok(MetaFields::new())
    }

    async fn create_metric_metadata(&self, _: &LoadedBenchmark, _: &str) -> Result<MetaFields> {
        Ok(MetaFields::new())
    }
}

fn submission(id: &str) -> SubmissionMeta {
    SubmissionMeta {
        submission_id: id.into(),
        submitter: "user-1".into(),
        model_type: "artificialsubject".into(),
        public: true,
        competition: None,
    }
}

fn ids(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[tokio::test]
async fn scores_every_pair_and_records_values() {
    let ledger = Arc::new(MemoryLedger::new());
    ledger.seed_benchmark_type(BenchmarkTypeRecord {
        identifier: "neural".into(),
        order: 0,
        parent: None,
        domain: "vision".into(),
        reference: None,
    });
    let domain = Arc::new(
        FixedDomain::default()
            .with("alexnet", "behavior", 0.3)
            .with("alexnet", "IT-ceiled", 0.4),
    );
    let endpoint = RunScoringEndpoint::new(domain.clone(), ledger.clone());

    let status = endpoint
        .run(&ids(&["alexnet"]), &ids(&["behavior", "IT-ceiled"]), &submission("42"))
        .await
        .unwrap();

    assert_eq!(status, SubmissionStatus::Successful);
    assert_eq!(
        ledger.get_submission("42").await.unwrap().status,
        SubmissionStatus::Successful
    );
    assert_eq!(ledger.score_count(), 2);

    let (model, created) = ledger
        .get_or_create_model(&score_ledger::NewModel {
            name: "alexnet".into(),
            owner: "user-1".into(),
            submission_id: "other".into(),
            domain: "vision".into(),
            public: false,
            competition: None,
            reference: None,
        })
        .await
        .unwrap();
    assert!(!created);
    assert_eq!(model.reference.as_deref(), Some("@article{alexnet}"));

    let mut scores = ledger.scores_for_model(&model.model_id).await.unwrap();
    scores.sort_by(|a, b| a.score_raw.partial_cmp(&b.score_raw).unwrap());
    assert_eq!(scores[0].score_raw, Some(0.3));
    assert_eq!(scores[0].score_ceiled, None);
    assert_eq!(scores[1].score_raw, Some(0.4));
    assert_eq!(scores[1].score_ceiled, Some(0.5));
    assert_eq!(scores[1].error, Some(0.1));
    assert!(scores.iter().all(|s| s.end_timestamp.is_some()));

    let ceiled_type = ledger.get_benchmark_type("IT-ceiled").await.unwrap().unwrap();
    assert_eq!(ceiled_type.parent.as_deref(), Some("neural"));
    assert_eq!(ceiled_type.order, score_ledger::DEFAULT_BENCHMARK_ORDER);
    let instances = ledger.benchmark_instances("IT-ceiled").await.unwrap();
    assert_eq!(instances[0].ceiling, Some(0.8));
    assert_eq!(instances[0].ceiling_error, Some(0.02));
}

#[tokio::test]
async fn missing_parent_is_not_linked() {
    let ledger = Arc::new(MemoryLedger::new());
    let domain = Arc::new(FixedDomain::default().with("alexnet", "IT-ceiled", 0.4));
    RunScoringEndpoint::new(domain, ledger.clone())
        .run(&ids(&["alexnet"]), &ids(&["IT-ceiled"]), &submission("1"))
        .await
        .unwrap();
    let benchmark_type = ledger.get_benchmark_type("IT-ceiled").await.unwrap().unwrap();
    assert_eq!(benchmark_type.parent, None);
}

#[tokio::test]
async fn existing_scores_are_not_recomputed() {
    let ledger = Arc::new(MemoryLedger::new());
    let domain = Arc::new(FixedDomain::default().with("alexnet", "behavior", 0.3));
    let endpoint = RunScoringEndpoint::new(domain.clone(), ledger.clone());

    endpoint
        .run(&ids(&["alexnet"]), &ids(&["behavior"]), &submission("1"))
        .await
        .unwrap();
    let status = endpoint
        .run(&ids(&["alexnet"]), &ids(&["behavior"]), &submission("2"))
        .await
        .unwrap();

    assert_eq!(status, SubmissionStatus::Successful);
    assert_eq!(domain.calls(), 1);
    assert_eq!(ledger.score_count(), 1);
}

#[tokio::test]
async fn failures_are_recorded_and_rerun() {
    let ledger = Arc::new(MemoryLedger::new());
    let broken = Arc::new(
        FixedDomain::default()
            .with("alexnet", "behavior", 0.3)
            .broken("resnet"),
    );
    let status = RunScoringEndpoint::new(broken, ledger.clone())
        .run(&ids(&["resnet", "alexnet"]), &ids(&["behavior"]), &submission("1"))
        .await
        .unwrap();

    assert_eq!(status, SubmissionStatus::Failure);
    assert_eq!(
        ledger.get_submission("1").await.unwrap().status,
        SubmissionStatus::Failure
    );
    assert_eq!(ledger.score_count(), 2);

    let (resnet, _) = ledger
        .get_or_create_model(&score_ledger::NewModel {
            name: "resnet".into(),
            owner: "user-1".into(),
            submission_id: "1".into(),
            domain: "vision".into(),
            public: true,
            competition: None,
            reference: None,
        })
        .await
        .unwrap();
    let failed = &ledger.scores_for_model(&resnet.model_id).await.unwrap()[0];
    assert_eq!(failed.score_raw, None);
    let comment = failed.comment.as_deref().unwrap();
    assert_eq!(comment.chars().count(), 1000);
    assert!(comment.contains("[...]"));

    // a later run with a working domain fills the empty row in place
    let fixed = Arc::new(FixedDomain::default().with("resnet", "behavior", 0.6));
    let status = RunScoringEndpoint::new(fixed, ledger.clone())
        .run(&ids(&["resnet"]), &ids(&["behavior"]), &submission("2"))
        .await
        .unwrap();
    assert_eq!(status, SubmissionStatus::Successful);
    assert_eq!(ledger.score_count(), 2);
    let rerun = &ledger.scores_for_model(&resnet.model_id).await.unwrap()[0];
    assert_eq!(rerun.score_raw, Some(0.6));
    assert_eq!(rerun.comment, None);
}
