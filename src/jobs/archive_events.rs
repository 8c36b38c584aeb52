//! Archive guest book events older than one month.
//!
//! Distinct-session view/download counts of old guest events are folded into
//! each book's legacy counters in `book_event_stats`, then the raw event
//! rows in the archived range are deleted (guest and logged-in alike -- the
//! logged-in counters live in `book_interactions`, not in the event stream).

use super::{Job, LegacyStats};
use crate::storage::Pool;
use anyhow::{Context, Result};
use chrono::{Months, Utc};
use rusqlite::OptionalExtension;
use std::collections::BTreeMap;
use tracing::info;

pub struct ArchiveGuestEvents;

#[async_trait::async_trait]
impl Job for ArchiveGuestEvents {
    fn name(&self) -> &'static str {
        "archive-guest-events"
    }

    async fn run(&self, pool: &Pool) -> Result<serde_json::Value> {
        let conn = pool.get().context("Failed to get DB connection")?;

        let cutoff = Utc::now()
            .checked_sub_months(Months::new(1))
            .context("Cutoff date underflow")?
            .to_rfc3339();
        info!(%cutoff, "Archiving guest events older than cutoff");

        // Distinct guest sessions per book, split by action.
        let mut stmt = conn.prepare(
            "SELECT reference_id, action, COUNT(DISTINCT session_id)
             FROM app_event_history
             WHERE created_at < ?1
               AND content_type = 'book'
               AND user_id IS NULL
               AND action IN ('view', 'download')
             GROUP BY reference_id, action",
        )?;
        let rows = stmt.query_map([&cutoff], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut archive: BTreeMap<String, LegacyStats> = BTreeMap::new();
        for r in rows {
            let (book_id, action, count) = r?;
            let entry = archive.entry(book_id).or_default();
            match action.as_str() {
                "view" => entry.view_count = count,
                _ => entry.download_count = count,
            }
        }
        drop(stmt);

        info!(books = archive.len(), "Found books with old guest events");

        let mut updated_books = 0usize;
        for (book_id, counts) in &archive {
            let current: Option<String> = conn
                .query_row(
                    "SELECT legacy_stats_json FROM book_event_stats WHERE book_id = ?1",
                    [book_id],
                    |row| row.get(0),
                )
                .optional()?;

            // Books without a stats row are skipped; the stats job creates
            // rows for them on its next pass.
            let Some(raw) = current else { continue };

            let mut legacy: LegacyStats = serde_json::from_str(&raw).unwrap_or_default();
            legacy.view_count += counts.view_count;
            legacy.download_count += counts.download_count;

            conn.execute(
                "UPDATE book_event_stats
                 SET legacy_stats_json = ?1, updated_at = ?2
                 WHERE book_id = ?3",
                rusqlite::params![
                    serde_json::to_string(&legacy)?,
                    Utc::now().to_rfc3339(),
                    book_id
                ],
            )?;
            updated_books += 1;
        }

        let deleted = conn
            .execute(
                "DELETE FROM app_event_history
                 WHERE created_at < ?1
                   AND content_type = 'book'
                   AND action IN ('view', 'download')",
                [&cutoff],
            )
            .context("Failed to delete archived events")?;

        info!(updated_books, deleted, "Guest event archive complete");

        Ok(serde_json::json!({
            "cutoff": cutoff,
            "books_with_old_events": archive.len(),
            "updated_books": updated_books,
            "deleted_events": deleted,
        }))
    }
}
