//! Job execution harness.
//!
//! `JobRunner` runs one named unit of work and guarantees exactly one
//! execution record is persisted for it, however it ends. `batch` drives an
//! ordered list of jobs through the runner with fail-fast semantics.

pub mod batch;
pub mod record;

use crate::jobs::Job;
use crate::storage::{self, Pool};
use chrono::Utc;
use self::record::{JobGroup, JobLogRecord, JobStatus, JobTrigger};
use tracing::{error, info};

/// Tagged failure surfaced by the runner and the batch.
#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    /// The unit of work itself failed. Its log row was already written.
    #[error("job '{name}' failed: {message}")]
    Job {
        name: String,
        message: String,
        detail: String,
    },

    /// Writing the execution record failed. Indistinguishable from a job
    /// failure as far as the batch halt policy is concerned.
    #[error("failed to persist execution record for '{name}': {cause}")]
    Storage { name: String, cause: anyhow::Error },

    /// Another batch currently holds the lease for this group.
    #[error("a '{group}' batch is already running (lease held)")]
    BatchAlreadyRunning { group: JobGroup },
}

/// Invocation context shared by every record a run produces.
#[derive(Debug, Clone, Copy)]
pub struct RunContext {
    pub group: JobGroup,
    pub trigger: JobTrigger,
}

/// Executes jobs one at a time and writes their log rows.
pub struct JobRunner {
    pool: Pool,
}

impl JobRunner {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run `job` exactly once and persist one log row for the attempt.
    ///
    /// No retry, no timeout: a hung job hangs the caller. On failure the row
    /// is written first, then the failure is returned -- logging never
    /// swallows the error. If the process dies before the job settles, no
    /// row exists for the attempt.
    pub async fn run_with_log(
        &self,
        ctx: RunContext,
        batch_id: Option<&str>,
        job: &dyn Job,
    ) -> Result<serde_json::Value, RunnerError> {
        let name = job.name();
        let started_at = Utc::now();

        let outcome = job.run(&self.pool).await;

        let finished_at = Utc::now();
        // Wall clock may step backwards under NTP correction; the log
        // invariant is duration_ms >= 0.
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0);

        match outcome {
            Ok(result) => {
                let row = JobLogRecord {
                    job_name: name.to_string(),
                    group: ctx.group,
                    status: JobStatus::Success,
                    triggered_by: ctx.trigger,
                    batch_id: batch_id.map(str::to_string),
                    started_at,
                    finished_at,
                    duration_ms,
                    result: result.clone(),
                    error: None,
                };
                storage::insert_job_log(&self.pool, &row).map_err(|e| {
                    RunnerError::Storage {
                        name: name.to_string(),
                        cause: e,
                    }
                })?;

                info!(job = %name, duration_ms, "Job succeeded");
                Ok(result)
            }
            Err(err) => {
                // Single conversion rule for all failures: Display is the
                // operator-facing message, the full anyhow chain goes into
                // the result payload as the stack.
                let mut message = err.to_string();
                if message.is_empty() {
                    message = "unknown error".to_string();
                }
                let detail = format!("{err:?}");

                let row = JobLogRecord {
                    job_name: name.to_string(),
                    group: ctx.group,
                    status: JobStatus::Failed,
                    triggered_by: ctx.trigger,
                    batch_id: batch_id.map(str::to_string),
                    started_at,
                    finished_at,
                    duration_ms,
                    result: serde_json::json!({ "stack": detail }),
                    error: Some(message.clone()),
                };
                storage::insert_job_log(&self.pool, &row).map_err(|e| {
                    RunnerError::Storage {
                        name: name.to_string(),
                        cause: e,
                    }
                })?;

                error!(job = %name, duration_ms, error = %message, "Job failed");
                Err(RunnerError::Job {
                    name: name.to_string(),
                    message,
                    detail,
                })
            }
        }
    }
}
