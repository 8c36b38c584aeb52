//! SQLite storage layer -- schema, queries, migrations.

pub mod lease;
pub mod schema;

use anyhow::{Context, Result};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

use crate::runner::record::{JobGroup, JobLogRecord};

/// Append one execution record to the job log.
///
/// This is the only write path into `job_logs`. The runner never reads rows
/// back; the CLI `history` subcommand is the only consumer.
pub fn insert_job_log(pool: &Pool, record: &JobLogRecord) -> Result<()> {
    let conn = pool.get()?;

    conn.execute(
        "INSERT INTO job_logs (job_name, job_group, status, triggered_by, batch_id,
                               started_at, finished_at, duration_ms, result_json, error)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        rusqlite::params![
            record.job_name,
            record.group.as_str(),
            record.status.as_str(),
            record.triggered_by.as_str(),
            record.batch_id,
            record.started_at.to_rfc3339(),
            record.finished_at.to_rfc3339(),
            record.duration_ms,
            serde_json::to_string(&record.result)?,
            record.error,
        ],
    )
    .context("Failed to insert job log")?;

    Ok(())
}

/// Row shape returned to the `history` subcommand.
#[derive(Debug)]
pub struct JobLogRow {
    pub id: i64,
    pub job_name: String,
    pub group: String,
    pub status: String,
    pub triggered_by: String,
    pub batch_id: Option<String>,
    pub started_at: String,
    pub duration_ms: i64,
    pub error: Option<String>,
}

/// List recent job log rows, newest first.
pub fn list_job_logs(pool: &Pool, group: Option<JobGroup>, limit: u32) -> Result<Vec<JobLogRow>> {
    let conn = pool.get()?;
    let mut out = Vec::new();

    match group {
        Some(g) => {
            let mut stmt = conn.prepare(
                "SELECT id, job_name, job_group, status, triggered_by, batch_id,
                        started_at, duration_ms, error
                 FROM job_logs WHERE job_group = ?1
                 ORDER BY id DESC LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![g.as_str(), limit], row_to_log)?;
            for r in rows {
                out.push(r?);
            }
        }
        None => {
            let mut stmt = conn.prepare(
                "SELECT id, job_name, job_group, status, triggered_by, batch_id,
                        started_at, duration_ms, error
                 FROM job_logs
                 ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(rusqlite::params![limit], row_to_log)?;
            for r in rows {
                out.push(r?);
            }
        }
    }

    Ok(out)
}

fn row_to_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<JobLogRow> {
    Ok(JobLogRow {
        id: row.get(0)?,
        job_name: row.get(1)?,
        group: row.get(2)?,
        status: row.get(3)?,
        triggered_by: row.get(4)?,
        batch_id: row.get(5)?,
        started_at: row.get(6)?,
        duration_ms: row.get(7)?,
        error: row.get(8)?,
    })
}
