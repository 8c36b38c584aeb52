//! Recompute aggregate book statistics.
//!
//! Per book, the authoritative counters are rebuilt from three sources:
//! archived legacy counts, logged-in interaction sums, and distinct guest
//! sessions still present in the event stream. Books are walked in batches
//! so a large catalog does not pin one giant result set.

use super::{Job, LegacyStats};
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::Utc;
use rusqlite::OptionalExtension;
use tracing::{debug, info};

pub struct UpdateBookStats {
    batch_size: i64,
}

impl Default for UpdateBookStats {
    fn default() -> Self {
        Self { batch_size: 100 }
    }
}

impl UpdateBookStats {
    fn refresh_book(&self, conn: &rusqlite::Connection, book_id: &str) -> Result<()> {
        let legacy: LegacyStats = conn
            .query_row(
                "SELECT legacy_stats_json FROM book_event_stats WHERE book_id = ?1",
                [book_id],
                |row| row.get::<_, String>(0),
            )
            .optional()?
            .map(|raw| serde_json::from_str(&raw).unwrap_or_default())
            .unwrap_or_default();

        // Logged-in traffic: ratings and per-user counters.
        let (rating_count, rating_sum, user_views, user_downloads): (i64, f64, i64, i64) = conn
            .query_row(
                "SELECT COUNT(CASE WHEN rating > 0 THEN 1 END),
                        COALESCE(SUM(CASE WHEN rating > 0 THEN rating ELSE 0 END), 0),
                        COALESCE(SUM(view_count), 0),
                        COALESCE(SUM(download_count), 0)
                 FROM book_interactions WHERE book_id = ?1",
                [book_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )?;

        // Guest traffic still in the event stream: one distinct session is
        // one view/download, matching how archival counted before deleting.
        let guest_views: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT session_id) FROM app_event_history
             WHERE reference_id = ?1 AND content_type = 'book'
               AND action = 'view' AND user_id IS NULL",
            [book_id],
            |row| row.get(0),
        )?;
        let guest_downloads: i64 = conn.query_row(
            "SELECT COUNT(DISTINCT session_id) FROM app_event_history
             WHERE reference_id = ?1 AND content_type = 'book'
               AND action = 'download' AND user_id IS NULL",
            [book_id],
            |row| row.get(0),
        )?;

        let total_views = user_views + guest_views + legacy.view_count;
        let total_downloads = user_downloads + guest_downloads + legacy.download_count;
        let rating = if rating_count > 0 {
            ((rating_sum / rating_count as f64) * 100.0).round() / 100.0
        } else {
            0.0
        };

        // Fresh rows get the default legacy counters; existing rows keep
        // theirs -- only the archive job writes legacy_stats_json.
        conn.execute(
            "INSERT INTO book_event_stats
                 (book_id, view_count, download_count, rating_count, rating_sum, rating, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(book_id) DO UPDATE SET
                 view_count = excluded.view_count,
                 download_count = excluded.download_count,
                 rating_count = excluded.rating_count,
                 rating_sum = excluded.rating_sum,
                 rating = excluded.rating,
                 updated_at = excluded.updated_at",
            rusqlite::params![
                book_id,
                total_views,
                total_downloads,
                rating_count,
                rating_sum,
                rating,
                Utc::now().to_rfc3339()
            ],
        )?;

        debug!(book_id, total_views, total_downloads, rating, "Book stats refreshed");
        Ok(())
    }
}

#[async_trait::async_trait]
impl Job for UpdateBookStats {
    fn name(&self) -> &'static str {
        "update-book-stats"
    }

    async fn run(&self, pool: &Pool) -> Result<serde_json::Value> {
        let conn = pool.get().context("Failed to get DB connection")?;

        let mut offset = 0i64;
        let mut processed = 0u64;
        let mut batches = 0u64;

        loop {
            let mut stmt =
                conn.prepare("SELECT id FROM books ORDER BY id LIMIT ?1 OFFSET ?2")?;
            let ids: Vec<String> = stmt
                .query_map([self.batch_size, offset], |row| row.get(0))?
                .collect::<rusqlite::Result<_>>()?;
            drop(stmt);

            if ids.is_empty() {
                break;
            }
            batches += 1;

            for book_id in &ids {
                self.refresh_book(&conn, book_id)
                    .with_context(|| format!("Failed to refresh stats for book {book_id}"))?;
                processed += 1;
            }

            offset += self.batch_size;
        }

        info!(processed, batches, "Book stats update complete");

        Ok(serde_json::json!({
            "processed_books": processed,
            "batch_size": self.batch_size,
            "batches": batches,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::open_pool;

    fn test_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    #[tokio::test]
    async fn test_combines_legacy_user_and_guest_counts() {
        let (_dir, pool) = test_pool();
        {
            let conn = pool.get().unwrap();
            conn.execute("INSERT INTO books (id, title) VALUES ('b1', 'Totals')", [])
                .unwrap();
            conn.execute(
                "INSERT INTO book_event_stats (book_id, legacy_stats_json)
                 VALUES ('b1', '{\"view_count\":3,\"download_count\":2}')",
                [],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO book_interactions (user_id, book_id, rating, view_count, download_count)
                 VALUES ('u1', 'b1', 4.0, 5, 1), ('u2', 'b1', 5.0, 2, 0)",
                [],
            )
            .unwrap();
            // Two distinct guest sessions viewing, one downloading.
            conn.execute(
                "INSERT INTO app_event_history (user_id, action, content_type, reference_id, session_id, created_at)
                 VALUES (NULL, 'view', 'book', 'b1', 's1', '2026-08-01T00:00:00+00:00'),
                        (NULL, 'view', 'book', 'b1', 's2', '2026-08-02T00:00:00+00:00'),
                        (NULL, 'download', 'book', 'b1', 's1', '2026-08-01T00:00:00+00:00')",
                [],
            )
            .unwrap();
        }

        let payload = UpdateBookStats::default().run(&pool).await.unwrap();
        assert_eq!(payload["processed_books"], 1);

        let conn = pool.get().unwrap();
        let (views, downloads, rating_count, rating): (i64, i64, i64, f64) = conn
            .query_row(
                "SELECT view_count, download_count, rating_count, rating
                 FROM book_event_stats WHERE book_id = 'b1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();

        // 5 + 2 user views, 2 guest sessions, 3 legacy
        assert_eq!(views, 12);
        // 1 user download, 1 guest session, 2 legacy
        assert_eq!(downloads, 4);
        assert_eq!(rating_count, 2);
        assert!((rating - 4.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_creates_stats_row_for_new_book() {
        let (_dir, pool) = test_pool();
        {
            let conn = pool.get().unwrap();
            conn.execute("INSERT INTO books (id, title) VALUES ('b9', 'Fresh')", [])
                .unwrap();
        }

        UpdateBookStats::default().run(&pool).await.unwrap();

        let conn = pool.get().unwrap();
        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM book_event_stats WHERE book_id = 'b9'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_walks_catalog_in_batches() {
        let (_dir, pool) = test_pool();
        {
            let conn = pool.get().unwrap();
            for i in 0..7 {
                conn.execute(
                    "INSERT INTO books (id, title) VALUES (?1, ?2)",
                    rusqlite::params![format!("b{i}"), format!("Book {i}")],
                )
                .unwrap();
            }
        }

        let job = UpdateBookStats { batch_size: 3 };
        let payload = job.run(&pool).await.unwrap();
        assert_eq!(payload["processed_books"], 7);
        assert_eq!(payload["batches"], 3);
    }
}
