//! Data retention for the project database.
//!
//! Two policies, both best-effort and triggered on `session.created`:
//! - age: observations and completed pending rows older than
//!   `retention_days` are removed (hard delete, including graph links and
//!   vector rows);
//! - size: while the database file exceeds `max_database_size_mb`, the
//!   oldest observations are evicted in batches.

use rusqlite::Connection;

/// Rows deleted per eviction batch; keeps the write lock short.
const EVICTION_BATCH: usize = 100;

/// Delete observations and completed pending messages older than
/// `retention_days`. Returns total rows removed. A zero setting disables
/// the policy entirely.
pub fn run_age_retention_sync(
    conn: &Connection,
    retention_days: u32,
) -> Result<usize, String> {
    if retention_days == 0 {
        return Ok(0);
    }
    let cutoff = (chrono::Utc::now() - chrono::Duration::days(retention_days as i64))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true);

    let mut total = 0;

    let old_ids = collect_ids(
        conn,
        "SELECT id FROM observations WHERE created_at < ?1",
        &cutoff,
    );
    total += delete_observations(conn, &old_ids).map_err(|e| e.to_string())?;

    total += conn
        .execute(
            "DELETE FROM pending_messages WHERE status = 'completed' AND created_at < ?1",
            [&cutoff],
        )
        .map_err(|e| e.to_string())?;

    if total > 0 {
        tracing::info!("[retention] removed {} rows older than {} days", total, retention_days);
    }
    Ok(total)
}

/// Evict oldest observations while the database file is over the size
/// cap. Returns rows evicted. A zero cap disables the policy.
pub fn enforce_size_cap_sync(conn: &Connection, max_database_size_mb: u64) -> Result<usize, String> {
    if max_database_size_mb == 0 {
        return Ok(0);
    }
    let cap_bytes = max_database_size_mb * 1024 * 1024;
    let mut evicted = 0;

    loop {
        if database_size_bytes(conn) <= cap_bytes {
            break;
        }
        let oldest = collect_ids(
            conn,
            &format!(
                "SELECT id FROM observations ORDER BY created_at ASC, rowid ASC LIMIT {EVICTION_BATCH}"
            ),
            "",
        );
        if oldest.is_empty() {
            break;
        }
        evicted += delete_observations(conn, &oldest).map_err(|e| e.to_string())?;
        // Reclaim freed pages so the size check observes progress
        if conn.execute_batch("VACUUM").is_err() {
            break;
        }
    }

    if evicted > 0 {
        tracing::info!(
            "[retention] evicted {} observations to stay under {} MB",
            evicted,
            max_database_size_mb
        );
    }
    Ok(evicted)
}

/// Current database size from page accounting (works before WAL merge).
fn database_size_bytes(conn: &Connection) -> u64 {
    let page_count: u64 = conn
        .query_row("PRAGMA page_count", [], |row| row.get(0))
        .unwrap_or(0);
    let page_size: u64 = conn
        .query_row("PRAGMA page_size", [], |row| row.get(0))
        .unwrap_or(4096);
    page_count * page_size
}

fn collect_ids(conn: &Connection, sql: &str, param: &str) -> Vec<String> {
    let mut stmt = match conn.prepare(sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            tracing::warn!("[retention] query failed: {e}");
            return Vec::new();
        }
    };
    let result = if param.is_empty() {
        stmt.query_map([], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(super::log_and_discard).collect())
    } else {
        stmt.query_map([param], |row| row.get::<_, String>(0))
            .map(|rows| rows.filter_map(super::log_and_discard).collect())
    };
    result.unwrap_or_default()
}

/// Hard-delete observations with their graph links and vector rows.
fn delete_observations(conn: &Connection, ids: &[String]) -> rusqlite::Result<usize> {
    let mut deleted = 0;
    let has_vec = super::table_exists(conn, "vec_observations");
    for id in ids {
        conn.execute("DELETE FROM mentions WHERE observation_id = ?1", [id])?;
        if has_vec {
            conn.execute("DELETE FROM vec_observations WHERE observation_id = ?1", [id])?;
        }
        deleted += conn.execute("DELETE FROM observations WHERE id = ?1", [id])?;
    }
    Ok(deleted)
}
