use crate::runner::record::JobGroup;
use crate::storage::Pool;
use anyhow::Result;
use serde::{Deserialize, Serialize};

pub mod archive_events;
pub mod book_stats;
pub mod exam_stats;

/// A named, parameterless unit of maintenance work.
#[async_trait::async_trait]
pub trait Job: Send + Sync {
    /// Stable identifier recorded in the job log (e.g. "archive-guest-events").
    fn name(&self) -> &'static str;

    /// Run to completion against the shared store. The returned payload is
    /// stored verbatim in the job log.
    async fn run(&self, pool: &Pool) -> Result<serde_json::Value>;
}

/// Archived guest counters kept per book in `book_event_stats`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct LegacyStats {
    #[serde(default)]
    pub view_count: i64,
    #[serde(default)]
    pub download_count: i64,
}

/// Ordered daily maintenance schedule.
///
/// Order matters: the stats jobs assume archival has already folded old
/// guest events into the legacy counters.
pub fn daily_jobs() -> Vec<Box<dyn Job>> {
    vec![
        Box::new(archive_events::ArchiveGuestEvents),
        Box::new(book_stats::UpdateBookStats::default()),
        Box::new(exam_stats::ReconcileExamStats),
    ]
}

/// The ordered job list for a group. Only the daily schedule ships jobs
/// today; the other groups exist in the log taxonomy but have no batch.
pub fn for_group(group: JobGroup) -> Vec<Box<dyn Job>> {
    match group {
        JobGroup::Daily => daily_jobs(),
        _ => Vec::new(),
    }
}

/// Look up a registered job by name, for manual `run-job` invocations.
pub fn find_job(name: &str) -> Option<Box<dyn Job>> {
    daily_jobs().into_iter().find(|j| j.name() == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daily_order_is_archive_then_stats() {
        let names: Vec<&str> = daily_jobs().iter().map(|j| j.name()).collect();
        assert_eq!(
            names,
            vec![
                "archive-guest-events",
                "update-book-stats",
                "reconcile-exam-stats"
            ]
        );
    }

    #[test]
    fn test_find_job_by_name() {
        assert!(find_job("update-book-stats").is_some());
        assert!(find_job("does-not-exist").is_none());
    }
}
