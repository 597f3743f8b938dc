use std::fmt;

use chrono::{DateTime, Utc};
use recondor_model::CampaignId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for campaign jobs.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Distinguishes the pipeline stages a job can drive.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobKind {
    Generation,
    DnsValidation,
    HttpKeyword,
}

pub const ALL_JOB_KINDS: [JobKind; 3] =
    [JobKind::Generation, JobKind::DnsValidation, JobKind::HttpKeyword];

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Generation => "generation",
            JobKind::DnsValidation => "dns",
            JobKind::HttpKeyword => "http_keyword",
        }
    }

    pub fn parse(value: &str) -> Option<JobKind> {
        match value {
            "generation" => Some(JobKind::Generation),
            "dns" => Some(JobKind::DnsValidation),
            "http_keyword" => Some(JobKind::HttpKeyword),
            _ => None,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Queue-visible job states. Pending/Queued/Retry are claimable; Running is
/// leased; Completed/Failed are terminal and retained for inspection.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum JobState {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Retry,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Queued => "queued",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Retry => "retry",
        }
    }

    pub fn parse(value: &str) -> Option<JobState> {
        match value {
            "pending" => Some(JobState::Pending),
            "queued" => Some(JobState::Queued),
            "running" => Some(JobState::Running),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "retry" => Some(JobState::Retry),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }

    pub fn is_claimable(&self) -> bool {
        matches!(self, JobState::Pending | JobState::Queued | JobState::Retry)
    }
}

/// Structured payload per job kind; carries only the batch cursor so a
/// follow-up job resumes where the previous batch stopped.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload")]
pub enum JobPayload {
    Generation(GenerationJob),
    DnsValidation(DnsValidationJob),
    HttpKeyword(HttpKeywordJob),
}

impl JobPayload {
    pub fn kind(&self) -> JobKind {
        match self {
            JobPayload::Generation(_) => JobKind::Generation,
            JobPayload::DnsValidation(_) => JobKind::DnsValidation,
            JobPayload::HttpKeyword(_) => JobKind::HttpKeyword,
        }
    }

    pub fn campaign_id(&self) -> CampaignId {
        match self {
            JobPayload::Generation(job) => job.campaign_id,
            JobPayload::DnsValidation(job) => job.campaign_id,
            JobPayload::HttpKeyword(job) => job.campaign_id,
        }
    }
}

/// One generation batch. The authoritative offset lives in the campaign
/// params and the shared config-hash state, not here.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GenerationJob {
    pub campaign_id: CampaignId,
    pub batch_size: u32,
}

/// One DNS validation batch over source domains, paged by offset index.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DnsValidationJob {
    pub campaign_id: CampaignId,
    /// Resume strictly after this source offset index.
    pub cursor: Option<i64>,
    pub batch_size: u32,
}

/// One HTTP/keyword batch over source domains, paged by domain name.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HttpKeywordJob {
    pub campaign_id: CampaignId,
    /// Resume strictly after this domain name.
    pub cursor: Option<String>,
    pub batch_size: u32,
}

/// Request used by producers; the store assigns id and timestamps.
#[derive(Clone, Debug)]
pub struct NewJob {
    pub payload: JobPayload,
    pub scheduled_at: DateTime<Utc>,
    pub max_attempts: u16,
}

impl NewJob {
    pub fn new(payload: JobPayload, max_attempts: u16) -> Self {
        Self {
            payload,
            scheduled_at: Utc::now(),
            max_attempts,
        }
    }
}

/// Envelope stored in persistence for each job. Lease fields are only ever
/// mutated through the claim/heartbeat/complete/fail protocol.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: JobId,
    pub campaign_id: CampaignId,
    pub payload: JobPayload,
    pub state: JobState,
    pub attempts: u16,
    pub max_attempts: u16,
    pub scheduled_at: DateTime<Utc>,
    pub next_execution_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub processing_server_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(job: NewJob) -> Self {
        let now = Utc::now();
        let campaign_id = job.payload.campaign_id();
        Self {
            id: JobId::new(),
            campaign_id,
            payload: job.payload,
            state: JobState::Pending,
            attempts: 0,
            max_attempts: job.max_attempts,
            scheduled_at: job.scheduled_at,
            next_execution_at: None,
            last_error: None,
            locked_at: None,
            locked_by: None,
            processing_server_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn kind(&self) -> JobKind {
        self.payload.kind()
    }
}
