// crates/open-mem-server/src/db/session.rs
// Session lifecycle operations

use open_mem_types::{Session, SessionStatus};
use rusqlite::{Connection, Row, params};

use super::log_and_discard;
use crate::utils::now_rfc3339;

const SESSION_COLUMNS: &str =
    "id, project_path, started_at, ended_at, status, observation_count, summary_id";

/// Parse one sessions row (column order per `SESSION_COLUMNS`).
pub fn parse_session_row(row: &Row<'_>) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        project_path: row.get(1)?,
        started_at: row.get(2)?,
        ended_at: row.get(3)?,
        status: SessionStatus::from_str_lossy(&row.get::<_, String>(4)?),
        observation_count: row.get(5)?,
        summary_id: row.get(6)?,
    })
}

/// Create a session on first event, or return the existing one.
/// Idempotent on repeated `session.created` deliveries.
pub fn get_or_create_session_sync(
    conn: &Connection,
    session_id: &str,
    project_path: &str,
) -> rusqlite::Result<Session> {
    conn.execute(
        "INSERT INTO sessions (id, project_path, started_at, status)
         VALUES (?1, ?2, ?3, 'active')
         ON CONFLICT(id) DO NOTHING",
        params![session_id, project_path, now_rfc3339()],
    )?;
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [session_id],
        parse_session_row,
    )
}

/// Fetch a session by id.
pub fn get_session_sync(conn: &Connection, session_id: &str) -> Option<Session> {
    conn.query_row(
        &format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"),
        [session_id],
        parse_session_row,
    )
    .ok()
}

/// Advance session status. The lifecycle is monotonic
/// (`active → idle ↔ active → completed`): a completed session never
/// reactivates, so the update is a no-op once status is `completed`.
pub fn update_session_status_sync(
    conn: &Connection,
    session_id: &str,
    status: SessionStatus,
) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE sessions SET status = ?1 WHERE id = ?2 AND status != 'completed'",
        params![status.as_str(), session_id],
    )?;
    Ok(updated > 0)
}

/// Mark a session completed, recording its end time and summary link.
pub fn mark_completed_sync(
    conn: &Connection,
    session_id: &str,
    summary_id: Option<&str>,
) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE sessions
         SET status = 'completed',
             ended_at = COALESCE(ended_at, ?1),
             summary_id = COALESCE(?2, summary_id)
         WHERE id = ?3",
        params![now_rfc3339(), summary_id, session_id],
    )?;
    Ok(())
}

/// Recent sessions for a project, newest first.
pub fn list_recent_sessions_sync(
    conn: &Connection,
    project_path: &str,
    limit: usize,
) -> rusqlite::Result<Vec<Session>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE project_path = ?1
         ORDER BY started_at DESC, rowid DESC
         LIMIT ?2"
    ))?;
    let rows = stmt
        .query_map(params![project_path, limit as i64], parse_session_row)?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}
