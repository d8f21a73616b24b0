//! Scoring submissions and recording the results
//!
//! Every model is scored on every benchmark. Each pair is bookkept in the
//! ledger: model and benchmark rows are created on first sight, an existing
//! score is never recomputed, and a failing pair is recorded on its score
//! row without stopping the remaining pairs.

use std::sync::Arc;

use chrono::Utc;
use score_ledger::{
    BenchmarkInstanceRecord, NewModel, ScoreRecord, SubmissionLedger, SubmissionMeta,
    SubmissionStatus,
};
use tracing::{debug, error, info, instrument, warn};

use crate::domain::{DomainPlugin, LoadedBenchmark};
use crate::error::Result;
use crate::score::Score;

/// Longest failure trace stored on a score row.
pub const MAX_COMMENT_LENGTH: usize = 1000;

const ELLIPSIS: &str = "[...]";

/// Fit `text` into `max_length` characters by replacing its middle with
/// `[...]`; the kept head is a third of the remaining budget, rounded up.
pub fn shorten_text(text: &str, max_length: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= max_length {
        return text.to_string();
    }
    let ellipsis_len = ELLIPSIS.chars().count();
    if max_length <= ellipsis_len {
        return chars[..max_length].iter().collect();
    }
    let budget = max_length - ellipsis_len;
    let head = budget.div_ceil(3);
    let tail = budget - head;
    let mut shortened: String = chars[..head].iter().collect();
    shortened.push_str(ELLIPSIS);
    shortened.extend(&chars[chars.len() - tail..]);
    shortened
}

/// Record `score` on `entry`: only the raw value for unceiled scores,
/// otherwise raw, ceiled and error.
pub fn score_to_database(score: &Score, entry: &mut ScoreRecord) {
    if score.ceiling.is_none() {
        entry.score_raw = Some(score.center);
    } else {
        entry.score_raw = Some(score.raw_center());
        entry.score_ceiled = Some(score.center);
        entry.error = score.error;
    }
}

/// Get or create the ledger rows for `benchmark`'s type and version.
///
/// A newly created type is linked to its parent when the parent exists; a
/// newly created instance stores the benchmark's ceiling.
pub async fn benchmark_instance_from_benchmark(
    ledger: &dyn SubmissionLedger,
    benchmark: &LoadedBenchmark,
    domain: &str,
) -> Result<BenchmarkInstanceRecord> {
    let (mut benchmark_type, created) = ledger
        .get_or_create_benchmark_type(&benchmark.identifier, domain)
        .await?;
    if created {
        match &benchmark.parent {
            Some(parent) if ledger.get_benchmark_type(parent).await?.is_some() => {
                benchmark_type.parent = Some(parent.clone());
            }
            Some(parent) => warn!(
                benchmark = %benchmark.identifier,
                parent = %parent,
                "Could not connect benchmark to parent since parent does not exist"
            ),
            None => debug!(benchmark = %benchmark.identifier, "Benchmark has no parent"),
        }
        benchmark_type.reference = benchmark.bibtex.clone();
        ledger.update_benchmark_type(&benchmark_type).await?;
    }

    let (mut instance, created) = ledger
        .get_or_create_benchmark_instance(&benchmark.identifier, benchmark.version)
        .await?;
    if created {
        if let Some(ceiling) = &benchmark.ceiling {
            instance.ceiling = Some(ceiling.center);
            instance.ceiling_error = ceiling.error;
            ledger.update_benchmark_instance(&instance).await?;
        }
    }
    Ok(instance)
}

fn error_trace(err: &(dyn std::error::Error + 'static)) -> String {
    let mut trace = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        trace.push_str("\ncaused by: ");
        trace.push_str(&cause.to_string());
        source = cause.source();
    }
    trace
}

/// Runs submissions against a domain and records them in a ledger.
pub struct RunScoringEndpoint {
    domain: Arc<dyn DomainPlugin>,
    ledger: Arc<dyn SubmissionLedger>,
}

impl RunScoringEndpoint {
    pub fn new(domain: Arc<dyn DomainPlugin>, ledger: Arc<dyn SubmissionLedger>) -> Self {
        Self { domain, ledger }
    }

    /// Score every model on every benchmark. The submission ends
    /// `successful` only if no pair failed.
    #[instrument(skip(self, models, benchmarks), fields(submission = %submission.submission_id))]
    pub async fn run(
        &self,
        models: &[String],
        benchmarks: &[String],
        submission: &SubmissionMeta,
    ) -> Result<SubmissionStatus> {
        self.ledger.create_submission(submission).await?;
        let mut all_successful = true;

        for model in models {
            for benchmark in benchmarks {
                info!(model = %model, benchmark = %benchmark, "Scoring");
                let mut row = None;
                if let Err(e) = self.score_pair(model, benchmark, submission, &mut row).await {
                    all_successful = false;
                    let trace = error_trace(&e);
                    error!(
                        model = %model,
                        benchmark = %benchmark,
                        error = %trace,
                        "Could not run model on benchmark"
                    );
                    if let Some(mut entry) = row {
                        entry.comment = Some(shorten_text(&trace, MAX_COMMENT_LENGTH));
                        if let Err(e) = self.ledger.update_score(&entry).await {
                            warn!(error = %e, "Could not store failure comment");
                        }
                    }
                }
            }
        }

        let status = if all_successful {
            SubmissionStatus::Successful
        } else {
            SubmissionStatus::Failure
        };
        self.ledger
            .set_submission_status(&submission.submission_id, status)
            .await?;
        info!(%status, "Submission stored");
        Ok(status)
    }

    async fn score_pair(
        &self,
        model_identifier: &str,
        benchmark_identifier: &str,
        submission: &SubmissionMeta,
        row: &mut Option<ScoreRecord>,
    ) -> Result<()> {
        let model = self.domain.load_model(model_identifier).await?;
        let (model_entry, _) = self
            .ledger
            .get_or_create_model(&NewModel {
                name: model_identifier.to_string(),
                owner: submission.submitter.clone(),
                submission_id: submission.submission_id.clone(),
                domain: self.domain.domain().to_string(),
                public: submission.public,
                competition: submission.competition.clone(),
                reference: model.bibtex.clone(),
            })
            .await?;

        let benchmark = self.domain.load_benchmark(benchmark_identifier).await?;
        let instance =
            benchmark_instance_from_benchmark(self.ledger.as_ref(), &benchmark, self.domain.domain())
                .await?;

        let (mut entry, created) = self
            .ledger
            .get_or_create_score(&instance.instance_id, &model_entry.model_id, Utc::now())
            .await?;
        if !created && entry.score_raw.is_some() {
            warn!(
                model = %model_identifier,
                benchmark = %benchmark_identifier,
                "A score already exists"
            );
            return Ok(());
        }
        if !created {
            entry.start_timestamp = Some(Utc::now());
            entry.comment = None;
            self.ledger.update_score(&entry).await?;
            warn!("A score entry exists but does not have a score value, running it again");
        }
        *row = Some(entry.clone());

        let score = self
            .domain
            .score(model_identifier, benchmark_identifier)
            .await?;
        entry.end_timestamp = Some(Utc::now());
        info!(
            model = %model_identifier,
            benchmark = %benchmark_identifier,
            center = score.center,
            "Scored"
        );
        score_to_database(&score, &mut entry);
        self.ledger.update_score(&entry).await?;
        Ok(())
    }
}
