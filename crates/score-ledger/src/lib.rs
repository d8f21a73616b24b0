//! Score-Ledger: persistence for Brain-Score submissions and scores
//!
//! Stores submissions, models, benchmark types and instances, scores, and
//! model/benchmark metadata behind the [`SubmissionLedger`] trait.
//!
//! ## Key Components
//!
//! - `SubmissionLedger`: backend-agnostic async trait
//! - `fakes::MemoryLedger`: in-memory implementation for tests
//! - `SurrealLedger`: SurrealDB implementation with schema migrations

mod error;
pub mod fakes;
pub mod ledger;
pub mod migrations;
mod schema;
pub mod surreal_ledger;

pub use error::{StateError, StorageError};
pub use ledger::{
    BenchmarkInstanceRecord, BenchmarkMetaRecord, BenchmarkTypeRecord, MetaFields, MetaKind,
    ModelMetadataRecord, ModelRecord, NewModel, ScoreRecord, StorageResult, SubmissionLedger,
    SubmissionMeta, SubmissionRecord, SubmissionStatus, DEFAULT_BENCHMARK_ORDER,
};
pub use surreal_ledger::SurrealLedger;

/// Result type for connection and schema operations
pub type Result<T> = std::result::Result<T, StateError>;
