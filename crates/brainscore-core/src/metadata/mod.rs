//! Plugin metadata: validation, generation, persistence and the combined
//! handling flow used by CI.

pub mod endpoint;
pub mod generate;
pub mod handle;
pub mod validate;

pub use endpoint::MetadataEndpoint;
pub use generate::{generate_metadata, BenchmarkMetadataGenerator, ModelMetadataGenerator};
pub use handle::{MetadataHandler, MetadataOutcome, VALIDATED_METADATA_FILE};
pub use validate::{find_metadata_file, validate_metadata_file, validate_metadata_str};
