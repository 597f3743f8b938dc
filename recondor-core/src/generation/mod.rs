//! Combinatorial domain generation: deterministic enumeration, config-hash
//! normalisation, and the shared-offset state that deduplicates enumeration
//! across campaigns with identical configurations.

pub mod engine;
pub mod hashing;
pub mod runner;
pub mod state;

pub use engine::{GenerationBatch, GenerationConfig};
pub use hashing::{config_hash, NormalizedGenerationConfig};
pub use runner::GenerationRunner;
pub use state::{GenerationStateStore, PostgresGenerationStateStore};
