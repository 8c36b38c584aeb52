//! Execution record types persisted to the `job_logs` table.

use chrono::{DateTime, Utc};

/// Classification of the schedule that triggered a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobGroup {
    Default,
    Daily,
    Maintenance,
    Integration,
    Report,
}

impl JobGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobGroup::Default => "default",
            JobGroup::Daily => "daily",
            JobGroup::Maintenance => "maintenance",
            JobGroup::Integration => "integration",
            JobGroup::Report => "report",
        }
    }
}

impl std::fmt::Display for JobGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "default" => Ok(JobGroup::Default),
            "daily" => Ok(JobGroup::Daily),
            "maintenance" => Ok(JobGroup::Maintenance),
            "integration" => Ok(JobGroup::Integration),
            "report" => Ok(JobGroup::Report),
            other => Err(format!("unknown job group '{other}'")),
        }
    }
}

/// Terminal outcome of a job invocation. No in-progress state is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobStatus {
    Success,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Success => "success",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of an invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum JobTrigger {
    System,
    Manual,
    Api,
}

impl JobTrigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobTrigger::System => "system",
            JobTrigger::Manual => "manual",
            JobTrigger::Api => "api",
        }
    }
}

impl std::fmt::Display for JobTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for JobTrigger {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(JobTrigger::System),
            "manual" => Ok(JobTrigger::Manual),
            "api" => Ok(JobTrigger::Api),
            other => Err(format!("unknown trigger '{other}'")),
        }
    }
}

/// One row of the append-only job log.
///
/// Built in memory after a job settles, written once, then dropped. The
/// runner never reads these rows back.
#[derive(Debug, serde::Serialize)]
pub struct JobLogRecord {
    pub job_name: String,
    pub group: JobGroup,
    pub status: JobStatus,
    pub triggered_by: JobTrigger,
    /// Shared by every record of one batch run; None for single-job runs.
    pub batch_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: i64,
    /// Job's success payload, or `{"stack": ...}` on failure.
    pub result: serde_json::Value,
    /// Present iff `status == Failed`, always non-empty.
    pub error: Option<String>,
}
