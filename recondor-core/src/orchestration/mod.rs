//! Durable job queue, leasing protocol, stage dispatch and worker loop.

pub mod config;
pub mod job;
pub mod memory;
pub mod persistence;
pub mod queue;
pub mod runner;
pub mod worker;

pub use config::{LeaseConfig, OrchestratorConfig, RetryConfig};
pub use job::{
    DnsValidationJob, GenerationJob, HttpKeywordJob, JobId, JobKind, JobPayload, JobRecord,
    JobState, NewJob, ALL_JOB_KINDS,
};
pub use memory::InMemoryJobStore;
pub use persistence::PostgresJobStore;
pub use queue::{JobStore, ReclaimReport};
pub use runner::{RunnerRegistry, StageError, StageOutcome, StageRunner};
pub use worker::{run_lease_housekeeper, CampaignWorker};
