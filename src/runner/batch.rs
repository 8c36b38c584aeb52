//! Fail-fast orchestration of an ordered job list.
//!
//! Jobs run strictly sequentially in list order. The first failure aborts
//! the remainder: later jobs may assume earlier ones completed (the stats
//! jobs assume archival already ran), so partial maintenance is worse than
//! stopping. There is no retry or resume; a new invocation always starts
//! from job 1.

use super::{JobRunner, RunContext, RunnerError};
use crate::jobs::Job;
use crate::storage::{self, Pool};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Lease lifetime in minutes; generous upper bound on a daily batch.
const LEASE_TTL_MINUTES: i64 = 360;

/// The job that aborted the batch.
#[derive(Debug)]
pub struct FailedJob {
    pub name: String,
    pub error: String,
}

/// Aggregate outcome of one batch run. The process-exit mapping lives in the
/// binary, which keeps this testable without spawning processes.
#[derive(Debug)]
pub struct BatchResult {
    pub batch_id: String,
    /// Names of jobs that completed, in execution order.
    pub succeeded: Vec<String>,
    pub failed: Option<FailedJob>,
    pub total_duration: Duration,
}

impl BatchResult {
    /// Exit status for the invoking scheduler: 0 on full success, 1 on any
    /// failure. No partial-success codes.
    pub fn exit_code(&self) -> u8 {
        if self.failed.is_none() {
            0
        } else {
            1
        }
    }
}

/// Run `jobs` in order under a group lease, logging every attempt.
///
/// A job failure is captured in `BatchResult::failed`, not bubbled as Err;
/// Err is reserved for pre-flight problems (lease held, lease storage).
pub async fn run_batch(
    pool: &Pool,
    ctx: RunContext,
    jobs: &[Box<dyn Job>],
) -> Result<BatchResult, RunnerError> {
    let batch_id = Uuid::new_v4().to_string();
    let total = jobs.len();

    let acquired = storage::lease::acquire(pool, ctx.group, &batch_id, LEASE_TTL_MINUTES)
        .map_err(|e| RunnerError::Storage {
            name: format!("{}-lease", ctx.group),
            cause: e,
        })?;
    if !acquired {
        return Err(RunnerError::BatchAlreadyRunning { group: ctx.group });
    }

    info!(group = %ctx.group, %batch_id, total, "Starting scheduled jobs");

    let runner = JobRunner::new(pool.clone());
    let started = Instant::now();
    let mut succeeded = Vec::with_capacity(total);
    let mut failed = None;

    for (i, job) in jobs.iter().enumerate() {
        info!(job = %job.name(), "Job {}/{}: starting", i + 1, total);

        match runner.run_with_log(ctx, Some(&batch_id), job.as_ref()).await {
            Ok(_) => {
                info!(job = %job.name(), "Job {}/{}: completed", i + 1, total);
                succeeded.push(job.name().to_string());
            }
            Err(err) => {
                error!(job = %job.name(), "Job {}/{}: failed, aborting batch: {}", i + 1, total, err);
                failed = Some(FailedJob {
                    name: job.name().to_string(),
                    error: err.to_string(),
                });
                break;
            }
        }
    }

    // The lease covers liveness, not outcome: drop it on abort too.
    if let Err(e) = storage::lease::release(pool, ctx.group, &batch_id) {
        warn!(group = %ctx.group, "Failed to release batch lease: {}", e);
    }

    let total_duration = started.elapsed();
    match &failed {
        None => info!(
            group = %ctx.group,
            "All {} jobs completed in {:.2}s",
            total,
            total_duration.as_secs_f64()
        ),
        Some(f) => error!(
            group = %ctx.group,
            job = %f.name,
            "Batch aborted after {} of {} jobs",
            succeeded.len() + 1,
            total
        ),
    }

    Ok(BatchResult {
        batch_id,
        succeeded,
        failed,
        total_duration,
    })
}
