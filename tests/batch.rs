//! Harness-level tests: one log row per execution, fail-fast ordering,
//! re-raise semantics, and batch run identity.

use anyhow::Result;
use chrono::DateTime;
use shelfkeeper::jobs::Job;
use shelfkeeper::runner::record::{JobGroup, JobTrigger};
use shelfkeeper::runner::{batch, JobRunner, RunContext, RunnerError};
use shelfkeeper::storage::{self, Pool};
use std::time::Duration;

struct OkJob {
    name: &'static str,
    sleep_ms: u64,
}

#[async_trait::async_trait]
impl Job for OkJob {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _pool: &Pool) -> Result<serde_json::Value> {
        tokio::time::sleep(Duration::from_millis(self.sleep_ms)).await;
        Ok(serde_json::json!({ "ok": true }))
    }
}

struct FailJob {
    name: &'static str,
    message: &'static str,
}

#[async_trait::async_trait]
impl Job for FailJob {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _pool: &Pool) -> Result<serde_json::Value> {
        anyhow::bail!("{}", self.message)
    }
}

fn test_pool() -> (tempfile::TempDir, Pool) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("batch.db");
    let pool = storage::open_pool(path.to_str().unwrap()).unwrap();
    (dir, pool)
}

fn ctx() -> RunContext {
    RunContext {
        group: JobGroup::Daily,
        trigger: JobTrigger::System,
    }
}

/// Rows in insertion order: (name, status, batch_id, started, finished, duration, error, result).
#[allow(clippy::type_complexity)]
fn all_rows(
    pool: &Pool,
) -> Vec<(
    String,
    String,
    Option<String>,
    String,
    String,
    i64,
    Option<String>,
    String,
)> {
    let conn = pool.get().unwrap();
    let mut stmt = conn
        .prepare(
            "SELECT job_name, status, batch_id, started_at, finished_at,
                    duration_ms, error, result_json
             FROM job_logs ORDER BY id ASC",
        )
        .unwrap();
    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
            ))
        })
        .unwrap();
    rows.map(|r| r.unwrap()).collect()
}

#[tokio::test]
async fn test_success_writes_exactly_one_consistent_row() {
    let (_dir, pool) = test_pool();
    let runner = JobRunner::new(pool.clone());

    let job = OkJob {
        name: "archive-guest-events",
        sleep_ms: 15,
    };
    let payload = runner.run_with_log(ctx(), None, &job).await.unwrap();
    assert_eq!(payload["ok"], true);

    let rows = all_rows(&pool);
    assert_eq!(rows.len(), 1);
    let (name, status, batch_id, started, finished, duration_ms, error, result) = &rows[0];
    assert_eq!(name, "archive-guest-events");
    assert_eq!(status, "success");
    assert!(batch_id.is_none());
    assert!(error.is_none());

    let started = DateTime::parse_from_rfc3339(started).unwrap();
    let finished = DateTime::parse_from_rfc3339(finished).unwrap();
    assert!(started <= finished);
    assert_eq!(*duration_ms, (finished - started).num_milliseconds());
    assert!(*duration_ms >= 0);

    let result: serde_json::Value = serde_json::from_str(result).unwrap();
    assert_eq!(result["ok"], true);
}

#[tokio::test]
async fn test_failure_is_logged_then_reraised_with_original_message() {
    let (_dir, pool) = test_pool();
    let runner = JobRunner::new(pool.clone());

    let job = FailJob {
        name: "update-book-stats",
        message: "DB timeout",
    };
    let err = runner.run_with_log(ctx(), None, &job).await.unwrap_err();

    match &err {
        RunnerError::Job { name, message, .. } => {
            assert_eq!(name, "update-book-stats");
            assert_eq!(message, "DB timeout");
        }
        other => panic!("expected Job error, got {other:?}"),
    }

    // The record was durably written before the error was returned.
    let rows = all_rows(&pool);
    assert_eq!(rows.len(), 1);
    let (name, status, _, _, _, _, error, result) = &rows[0];
    assert_eq!(name, "update-book-stats");
    assert_eq!(status, "failed");
    assert_eq!(error.as_deref(), Some("DB timeout"));

    let result: serde_json::Value = serde_json::from_str(result).unwrap();
    assert!(result["stack"].as_str().unwrap().contains("DB timeout"));
}

#[tokio::test]
async fn test_status_and_error_correlate_across_records() {
    let (_dir, pool) = test_pool();
    let runner = JobRunner::new(pool.clone());

    let _ = runner
        .run_with_log(ctx(), None, &OkJob { name: "a", sleep_ms: 0 })
        .await;
    let _ = runner
        .run_with_log(ctx(), None, &FailJob { name: "b", message: "boom" })
        .await;
    let _ = runner
        .run_with_log(ctx(), None, &OkJob { name: "c", sleep_ms: 0 })
        .await;

    for (name, status, _, _, _, _, error, _) in all_rows(&pool) {
        match status.as_str() {
            "failed" => assert!(
                error.as_deref().is_some_and(|e| !e.is_empty()),
                "failed row '{name}' must carry a non-empty error"
            ),
            "success" => assert!(error.is_none(), "success row '{name}' must not carry an error"),
            other => panic!("unexpected status '{other}'"),
        }
    }
}

#[tokio::test]
async fn test_fail_fast_skips_later_jobs_and_exits_nonzero() {
    let (_dir, pool) = test_pool();

    let jobs: Vec<Box<dyn Job>> = vec![
        Box::new(OkJob { name: "archive-guest-events", sleep_ms: 0 }),
        Box::new(FailJob { name: "update-book-stats", message: "DB timeout" }),
        Box::new(OkJob { name: "reconcile-exam-stats", sleep_ms: 0 }),
    ];

    let result = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();

    assert_eq!(result.succeeded, vec!["archive-guest-events"]);
    let failed = result.failed.as_ref().expect("batch must record the failure");
    assert_eq!(failed.name, "update-book-stats");
    assert!(failed.error.contains("DB timeout"));
    assert_eq!(result.exit_code(), 1);

    // A and B are logged; C never ran.
    let rows = all_rows(&pool);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].0, "archive-guest-events");
    assert_eq!(rows[0].1, "success");
    assert_eq!(rows[1].0, "update-book-stats");
    assert_eq!(rows[1].1, "failed");
}

#[tokio::test]
async fn test_all_success_runs_in_order_with_clean_exit() {
    let (_dir, pool) = test_pool();

    let jobs: Vec<Box<dyn Job>> = vec![
        Box::new(OkJob { name: "a", sleep_ms: 10 }),
        Box::new(OkJob { name: "b", sleep_ms: 10 }),
        Box::new(OkJob { name: "c", sleep_ms: 10 }),
    ];

    let result = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();

    assert_eq!(result.succeeded, vec!["a", "b", "c"]);
    assert!(result.failed.is_none());
    assert_eq!(result.exit_code(), 0);

    let rows = all_rows(&pool);
    let names: Vec<&str> = rows.iter().map(|r| r.0.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);

    // Sequential, non-overlapping execution: the batch takes at least as
    // long as its parts (small slack for clock resolution).
    let sum_ms: i64 = rows.iter().map(|r| r.5).sum();
    assert!(result.total_duration.as_millis() as i64 + 5 >= sum_ms);

    // Every record of the run shares the batch id.
    for (_, _, batch_id, ..) in &rows {
        assert_eq!(batch_id.as_deref(), Some(result.batch_id.as_str()));
    }
}

#[tokio::test]
async fn test_separate_invocations_produce_disjoint_records() {
    let (_dir, pool) = test_pool();

    let jobs: Vec<Box<dyn Job>> = vec![
        Box::new(OkJob { name: "a", sleep_ms: 0 }),
        Box::new(OkJob { name: "b", sleep_ms: 0 }),
    ];

    let first = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();
    let after_first = all_rows(&pool);
    assert_eq!(after_first.len(), 2);

    let second = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();
    assert_ne!(first.batch_id, second.batch_id);

    let after_second = all_rows(&pool);
    assert_eq!(after_second.len(), 4);
    // Run 1's rows are untouched by run 2.
    assert_eq!(&after_second[..2], &after_first[..]);
}

#[tokio::test]
async fn test_held_lease_blocks_the_batch() {
    let (_dir, pool) = test_pool();

    assert!(storage::lease::acquire(&pool, JobGroup::Daily, "other-run", 60).unwrap());

    let jobs: Vec<Box<dyn Job>> = vec![Box::new(OkJob { name: "a", sleep_ms: 0 })];
    let err = batch::run_batch(&pool, ctx(), &jobs).await.unwrap_err();
    assert!(matches!(
        err,
        RunnerError::BatchAlreadyRunning { group: JobGroup::Daily }
    ));

    // Nothing ran, nothing was logged.
    assert!(all_rows(&pool).is_empty());

    // Release and the batch goes through.
    storage::lease::release(&pool, JobGroup::Daily, "other-run").unwrap();
    let result = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();
    assert_eq!(result.exit_code(), 0);
}

#[tokio::test]
async fn test_lease_is_released_after_an_aborted_batch() {
    let (_dir, pool) = test_pool();

    let jobs: Vec<Box<dyn Job>> = vec![Box::new(FailJob { name: "a", message: "boom" })];
    let result = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();
    assert_eq!(result.exit_code(), 1);

    // A follow-up invocation is not blocked by the failed run's lease.
    let jobs: Vec<Box<dyn Job>> = vec![Box::new(OkJob { name: "a", sleep_ms: 0 })];
    let result = batch::run_batch(&pool, ctx(), &jobs).await.unwrap();
    assert_eq!(result.exit_code(), 0);
}
