//! Advisory batch leases, keyed by job group.
//!
//! The external scheduler is expected to fire at most one batch at a time,
//! but nothing enforces that. A lease row closes the gap: a batch takes the
//! lease for its group before running and drops it when done. Leases carry
//! an expiry so a crashed batch does not wedge the schedule forever.

use super::Pool;
use crate::runner::record::JobGroup;
use anyhow::{Context, Result};
use chrono::Utc;

/// Try to take the lease for `group` on behalf of `holder`.
///
/// Returns false if someone else holds a live lease. An expired lease is
/// silently taken over.
pub fn acquire(pool: &Pool, group: JobGroup, holder: &str, ttl_minutes: i64) -> Result<bool> {
    let conn = pool.get()?;
    let now = Utc::now();
    let expires_at = now + chrono::Duration::minutes(ttl_minutes);

    let changed = conn
        .execute(
            "INSERT INTO batch_leases (job_group, holder, acquired_at, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_group) DO UPDATE SET
                 holder = excluded.holder,
                 acquired_at = excluded.acquired_at,
                 expires_at = excluded.expires_at
             WHERE batch_leases.expires_at < excluded.acquired_at",
            rusqlite::params![
                group.as_str(),
                holder,
                now.to_rfc3339(),
                expires_at.to_rfc3339()
            ],
        )
        .context("Failed to upsert batch lease")?;

    Ok(changed == 1)
}

/// Drop the lease if we still hold it. Releasing someone else's lease is a
/// no-op, not an error.
pub fn release(pool: &Pool, group: JobGroup, holder: &str) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "DELETE FROM batch_leases WHERE job_group = ?1 AND holder = ?2",
        rusqlite::params![group.as_str(), holder],
    )
    .context("Failed to release batch lease")?;

    Ok(())
}
