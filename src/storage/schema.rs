//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Append-only execution log: one row per job invocation, never
        -- updated or deleted by the runner.
        CREATE TABLE IF NOT EXISTS job_logs (
            id INTEGER PRIMARY KEY,
            job_name TEXT NOT NULL,
            job_group TEXT NOT NULL DEFAULT 'default',
            status TEXT NOT NULL,
            triggered_by TEXT NOT NULL DEFAULT 'system',
            batch_id TEXT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            duration_ms INTEGER NOT NULL,
            result_json TEXT NOT NULL DEFAULT '{}',
            error TEXT,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE INDEX IF NOT EXISTS idx_job_logs_name ON job_logs(job_name);
        CREATE INDEX IF NOT EXISTS idx_job_logs_status ON job_logs(status);
        CREATE INDEX IF NOT EXISTS idx_job_logs_group ON job_logs(job_group);
        CREATE INDEX IF NOT EXISTS idx_job_logs_started ON job_logs(started_at);

        -- Advisory lease per job group. A live lease means a batch for that
        -- group is (believed to be) running; expiry recovers from crashes.
        CREATE TABLE IF NOT EXISTS batch_leases (
            job_group TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS books (
            id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Aggregated per-book engagement counters, plus archived guest
        -- counts folded into legacy_stats_json by the archive job.
        CREATE TABLE IF NOT EXISTS book_event_stats (
            book_id TEXT PRIMARY KEY REFERENCES books(id) ON DELETE CASCADE,
            view_count INTEGER NOT NULL DEFAULT 0,
            download_count INTEGER NOT NULL DEFAULT 0,
            rating_count INTEGER NOT NULL DEFAULT 0,
            rating_sum REAL NOT NULL DEFAULT 0,
            rating REAL NOT NULL DEFAULT 0,
            legacy_stats_json TEXT NOT NULL
                DEFAULT '{"view_count":0,"download_count":0}',
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        -- Per-user interactions (logged-in traffic).
        CREATE TABLE IF NOT EXISTS book_interactions (
            id INTEGER PRIMARY KEY,
            user_id TEXT NOT NULL,
            book_id TEXT NOT NULL REFERENCES books(id) ON DELETE CASCADE,
            rating REAL NOT NULL DEFAULT 0,
            view_count INTEGER NOT NULL DEFAULT 0,
            download_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            UNIQUE (user_id, book_id)
        );

        -- Raw event stream; guest events carry a NULL user_id and a
        -- session_id minted by the frontend. created_at is written by the
        -- event producer as RFC 3339 so cutoff comparisons stay consistent.
        CREATE TABLE IF NOT EXISTS app_event_history (
            id INTEGER PRIMARY KEY,
            user_id TEXT,
            action TEXT NOT NULL,
            content_type TEXT NOT NULL DEFAULT 'book',
            reference_id TEXT NOT NULL,
            session_id TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_event_history_reference
            ON app_event_history(reference_id);
        CREATE INDEX IF NOT EXISTS idx_event_history_created
            ON app_event_history(created_at);

        CREATE TABLE IF NOT EXISTS exam_sessions (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            score REAL,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS exam_session_answers (
            id INTEGER PRIMARY KEY,
            session_id TEXT NOT NULL REFERENCES exam_sessions(id) ON DELETE CASCADE,
            question_id TEXT NOT NULL,
            is_correct INTEGER NOT NULL
        );

        CREATE TABLE IF NOT EXISTS exam_questions (
            id TEXT PRIMARY KEY,
            subject_id TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS exam_question_tags (
            question_id TEXT NOT NULL REFERENCES exam_questions(id) ON DELETE CASCADE,
            tag_id TEXT NOT NULL,
            PRIMARY KEY (question_id, tag_id)
        );

        CREATE TABLE IF NOT EXISTS exam_user_stats_global (
            user_id TEXT PRIMARY KEY,
            total_exams_taken INTEGER NOT NULL DEFAULT 0,
            total_questions_answered INTEGER NOT NULL DEFAULT 0,
            total_correct_answers INTEGER NOT NULL DEFAULT 0,
            total_wrong_answers INTEGER NOT NULL DEFAULT 0,
            average_score REAL NOT NULL DEFAULT 0,
            last_active_at TEXT,
            updated_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS exam_user_stats_subject (
            user_id TEXT NOT NULL,
            subject_id TEXT NOT NULL,
            total_questions_answered INTEGER NOT NULL DEFAULT 0,
            total_correct INTEGER NOT NULL DEFAULT 0,
            total_wrong INTEGER NOT NULL DEFAULT 0,
            accuracy_rate REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, subject_id)
        );

        CREATE TABLE IF NOT EXISTS exam_user_stats_tag (
            user_id TEXT NOT NULL,
            tag_id TEXT NOT NULL,
            total_questions_answered INTEGER NOT NULL DEFAULT 0,
            total_correct INTEGER NOT NULL DEFAULT 0,
            total_wrong INTEGER NOT NULL DEFAULT 0,
            accuracy_rate REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (user_id, tag_id)
        );"#,
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrate_creates_tables() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        // Verify tables exist by querying them
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM job_logs", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM book_event_stats", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();
        migrate(&conn).unwrap(); // Should not error
    }

    #[test]
    fn test_legacy_stats_default_is_valid_json() {
        let conn = Connection::open_in_memory().unwrap();
        migrate(&conn).unwrap();

        conn.execute("INSERT INTO books (id, title) VALUES ('b1', 'Test')", [])
            .unwrap();
        conn.execute(
            "INSERT INTO book_event_stats (book_id) VALUES ('b1')",
            [],
        )
        .unwrap();

        let raw: String = conn
            .query_row(
                "SELECT legacy_stats_json FROM book_event_stats WHERE book_id = 'b1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["view_count"], 0);
    }
}
