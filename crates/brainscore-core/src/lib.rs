//! Brainscore Core Library
//!
//! Plugin resolution, change-driven scoping, score handoff, metadata
//! handling and scoring bookkeeping for Brain-Score domain libraries.

pub mod changes;
pub mod config;
pub mod domain;
pub mod error;
pub mod git;
pub mod metadata;
pub mod plugin;
pub mod score;
pub mod scoring;
pub mod telemetry;

pub use changes::{
    is_plugin_only, parse_plugin_changes, scoring_info, testing_info, tests_for_changes,
    PluginChanges, ScoringInfo, MODEL_SUBSET, SPECIAL_PLUGIN_FILES,
};

pub use config::BrainscoreConfig;

pub use domain::{DomainPlugin, DomainRegistry, ExternalDomainPlugin, LoadedBenchmark, LoadedModel};

pub use error::{BrainscoreError, Result};

pub use git::GitClient;

pub use metadata::{
    generate_metadata, validate_metadata_file, MetadataEndpoint, MetadataHandler,
    MetadataOutcome,
};

pub use plugin::{import_plugin, PluginHandle, PluginLocator, PluginType};

pub use score::{Score, ScoreHandoff, SCORE_PATH_VAR};

pub use scoring::{shorten_text, RunScoringEndpoint};

pub use telemetry::init_tracing;

pub use conda_env_manager::{EnvConfig, InstallPreference};
pub use score_ledger::{SubmissionLedger, SubmissionMeta, SubmissionStatus};
