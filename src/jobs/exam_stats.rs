//! Rebuild per-user exam statistics from raw sessions and answers.
//!
//! The three stats tables (global, per-subject, per-tag) are derived data;
//! this job recomputes them wholesale inside one transaction so readers
//! never see a half-reconciled state.

use super::Job;
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::Utc;
use tracing::info;

pub struct ReconcileExamStats;

#[async_trait::async_trait]
impl Job for ReconcileExamStats {
    fn name(&self) -> &'static str {
        "reconcile-exam-stats"
    }

    async fn run(&self, pool: &Pool) -> Result<serde_json::Value> {
        let mut conn = pool.get().context("Failed to get DB connection")?;
        let now = Utc::now().to_rfc3339();

        let tx = conn.transaction()?;

        let global_rows = tx
            .execute(
                "INSERT INTO exam_user_stats_global
                     (user_id, total_exams_taken, total_questions_answered,
                      total_correct_answers, total_wrong_answers, average_score,
                      last_active_at, updated_at)
                 SELECT s.user_id,
                        COUNT(DISTINCT CASE WHEN s.status = 'completed' THEN s.id END),
                        COUNT(a.id),
                        COUNT(CASE WHEN a.is_correct = 1 THEN 1 END),
                        COUNT(CASE WHEN a.is_correct = 0 THEN 1 END),
                        COALESCE(AVG(CASE WHEN s.status = 'completed' THEN s.score END), 0),
                        MAX(s.updated_at),
                        ?1
                 FROM exam_sessions s
                 LEFT JOIN exam_session_answers a ON a.session_id = s.id
                 WHERE s.user_id IS NOT NULL
                 GROUP BY s.user_id
                 ON CONFLICT(user_id) DO UPDATE SET
                     total_exams_taken = excluded.total_exams_taken,
                     total_questions_answered = excluded.total_questions_answered,
                     total_correct_answers = excluded.total_correct_answers,
                     total_wrong_answers = excluded.total_wrong_answers,
                     average_score = excluded.average_score,
                     last_active_at = excluded.last_active_at,
                     updated_at = excluded.updated_at",
                [&now],
            )
            .context("Failed to rebuild global exam stats")?;

        let subject_rows = tx
            .execute(
                "INSERT INTO exam_user_stats_subject
                     (user_id, subject_id, total_questions_answered,
                      total_correct, total_wrong, accuracy_rate, updated_at)
                 SELECT s.user_id, q.subject_id,
                        COUNT(a.id),
                        COUNT(CASE WHEN a.is_correct = 1 THEN 1 END),
                        COUNT(CASE WHEN a.is_correct = 0 THEN 1 END),
                        COALESCE(CAST(COUNT(CASE WHEN a.is_correct = 1 THEN 1 END) AS REAL)
                                 / NULLIF(COUNT(a.id), 0) * 100, 0),
                        ?1
                 FROM exam_sessions s
                 JOIN exam_session_answers a ON a.session_id = s.id
                 JOIN exam_questions q ON q.id = a.question_id
                 WHERE s.user_id IS NOT NULL
                 GROUP BY s.user_id, q.subject_id
                 ON CONFLICT(user_id, subject_id) DO UPDATE SET
                     total_questions_answered = excluded.total_questions_answered,
                     total_correct = excluded.total_correct,
                     total_wrong = excluded.total_wrong,
                     accuracy_rate = excluded.accuracy_rate,
                     updated_at = excluded.updated_at",
                [&now],
            )
            .context("Failed to rebuild subject exam stats")?;

        let tag_rows = tx
            .execute(
                "INSERT INTO exam_user_stats_tag
                     (user_id, tag_id, total_questions_answered,
                      total_correct, total_wrong, accuracy_rate, updated_at)
                 SELECT s.user_id, t.tag_id,
                        COUNT(a.id),
                        COUNT(CASE WHEN a.is_correct = 1 THEN 1 END),
                        COUNT(CASE WHEN a.is_correct = 0 THEN 1 END),
                        COALESCE(CAST(COUNT(CASE WHEN a.is_correct = 1 THEN 1 END) AS REAL)
                                 / NULLIF(COUNT(a.id), 0) * 100, 0),
                        ?1
                 FROM exam_sessions s
                 JOIN exam_session_answers a ON a.session_id = s.id
                 JOIN exam_question_tags t ON t.question_id = a.question_id
                 WHERE s.user_id IS NOT NULL
                 GROUP BY s.user_id, t.tag_id
                 ON CONFLICT(user_id, tag_id) DO UPDATE SET
                     total_questions_answered = excluded.total_questions_answered,
                     total_correct = excluded.total_correct,
                     total_wrong = excluded.total_wrong,
                     accuracy_rate = excluded.accuracy_rate,
                     updated_at = excluded.updated_at",
                [&now],
            )
            .context("Failed to rebuild tag exam stats")?;

        tx.commit()?;

        info!(global_rows, subject_rows, tag_rows, "Exam stats reconciled");

        Ok(serde_json::json!({
            "global_rows": global_rows,
            "subject_rows": subject_rows,
            "tag_rows": tag_rows,
        }))
    }
}
