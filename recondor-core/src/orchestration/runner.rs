use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::job::{JobKind, JobPayload, JobRecord};

/// What a stage runner reports for one processed batch.
#[derive(Clone, Debug, Default)]
pub struct StageOutcome {
    pub processed: u64,
    pub succeeded: u64,
    pub failed: u64,
    /// True when the stage has no further batches for this campaign.
    pub done: bool,
    /// Follow-up job continuing the stage; ignored when `done` is set.
    pub next_payload: Option<JobPayload>,
}

impl StageOutcome {
    pub fn done() -> Self {
        Self {
            done: true,
            ..Self::default()
        }
    }
}

/// Job-level stage failure. Per-record failures are recorded in result rows
/// and never surface here.
#[derive(Clone, Debug)]
pub struct StageError {
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn terminal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for StageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for StageError {}

/// One pipeline stage. Runners process exactly one batch per call and hand
/// continuation state back through the outcome payload.
#[async_trait]
pub trait StageRunner: Send + Sync {
    async fn run(&self, job: &JobRecord) -> Result<StageOutcome, StageError>;
}

/// Maps job kinds to their runners; tagged dispatch, nothing dynamic beyond
/// the trait object.
#[derive(Default)]
pub struct RunnerRegistry {
    runners: HashMap<JobKind, Arc<dyn StageRunner>>,
}

impl RunnerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(mut self, kind: JobKind, runner: Arc<dyn StageRunner>) -> Self {
        self.runners.insert(kind, runner);
        self
    }

    pub fn get(&self, kind: JobKind) -> Option<Arc<dyn StageRunner>> {
        self.runners.get(&kind).cloned()
    }

    pub fn kinds(&self) -> Vec<JobKind> {
        self.runners.keys().copied().collect()
    }
}
