// crates/open-mem-server/src/db/summary.rs
// Session summary storage (exactly zero or one per session)

use open_mem_types::SessionSummary;
use rusqlite::{Connection, Row, params};

use super::{log_and_discard, parse_json_array_column, to_json_array};

const SUMMARY_COLUMNS: &str = "id, session_id, summary, key_decisions, files_modified, concepts, \
     created_at, token_count, request, investigated, learned, completed, next_steps";

/// Parse one session_summaries row (column order per `SUMMARY_COLUMNS`).
pub fn parse_summary_row(row: &Row<'_>) -> rusqlite::Result<SessionSummary> {
    Ok(SessionSummary {
        id: row.get(0)?,
        session_id: row.get(1)?,
        summary: row.get(2)?,
        key_decisions: parse_json_array_column(3, row.get(3)?)?,
        files_modified: parse_json_array_column(4, row.get(4)?)?,
        concepts: parse_json_array_column(5, row.get(5)?)?,
        created_at: row.get(6)?,
        token_count: row.get(7)?,
        request: row.get(8)?,
        investigated: row.get(9)?,
        learned: row.get(10)?,
        completed: row.get(11)?,
        next_steps: row.get(12)?,
    })
}

/// Write a summary for a session, replacing any previous one.
/// Callers only invoke this after a successful summarization call, which
/// is what keeps "replace only on success" true.
pub fn upsert_summary_sync(conn: &Connection, summary: &SessionSummary) -> rusqlite::Result<()> {
    conn.execute(
        "DELETE FROM session_summaries WHERE session_id = ?1",
        [&summary.session_id],
    )?;
    insert_summary_row(conn, summary)
}

fn insert_summary_row(conn: &Connection, summary: &SessionSummary) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO session_summaries ({SUMMARY_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            summary.id,
            summary.session_id,
            summary.summary,
            to_json_array(&summary.key_decisions),
            to_json_array(&summary.files_modified),
            to_json_array(&summary.concepts),
            summary.created_at,
            summary.token_count,
            summary.request,
            summary.investigated,
            summary.learned,
            summary.completed,
            summary.next_steps,
        ],
    )?;
    Ok(())
}

/// Import a summary by primary key. Returns false when a row with the
/// same id already exists and `overwrite` is off.
pub fn import_summary_sync(
    conn: &Connection,
    summary: &SessionSummary,
    overwrite: bool,
) -> rusqlite::Result<bool> {
    let exists: bool = conn
        .query_row(
            "SELECT 1 FROM session_summaries WHERE id = ?1",
            [&summary.id],
            |_| Ok(true),
        )
        .unwrap_or(false);
    if exists {
        if !overwrite {
            return Ok(false);
        }
        conn.execute("DELETE FROM session_summaries WHERE id = ?1", [&summary.id])?;
    }
    // A different row may still hold this session (unique session_id)
    conn.execute(
        "DELETE FROM session_summaries WHERE session_id = ?1",
        [&summary.session_id],
    )?;
    insert_summary_row(conn, summary)?;
    Ok(true)
}

/// Fetch a summary by id.
pub fn get_summary_sync(conn: &Connection, id: &str) -> Option<SessionSummary> {
    conn.query_row(
        &format!("SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE id = ?1"),
        [id],
        parse_summary_row,
    )
    .ok()
}

/// Fetch the summary for a session, if one was written.
pub fn get_summary_by_session_sync(conn: &Connection, session_id: &str) -> Option<SessionSummary> {
    conn.query_row(
        &format!("SELECT {SUMMARY_COLUMNS} FROM session_summaries WHERE session_id = ?1"),
        [session_id],
        parse_summary_row,
    )
    .ok()
}

/// Most recent summaries, newest first (context-builder input).
pub fn list_recent_summaries_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<SessionSummary>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SUMMARY_COLUMNS} FROM session_summaries
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map([limit as i64], parse_summary_row)?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}

/// Remove the summary for a session (used when re-summarizing fails).
pub fn delete_summary_for_session_sync(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM session_summaries WHERE session_id = ?1",
        [session_id],
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{sample_summary, seed_session, setup_test_connection};

    #[test]
    fn one_summary_per_session() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");

        upsert_summary_sync(&conn, &sample_summary("sum1", "s1")).unwrap();
        let mut replacement = sample_summary("sum2", "s1");
        replacement.summary = "replaced".into();
        upsert_summary_sync(&conn, &replacement).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM session_summaries WHERE session_id = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(
            get_summary_by_session_sync(&conn, "s1").unwrap().summary,
            "replaced"
        );
    }

    #[test]
    fn import_skips_duplicates_by_primary_key() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");

        assert!(import_summary_sync(&conn, &sample_summary("sum1", "s1"), false).unwrap());
        assert!(!import_summary_sync(&conn, &sample_summary("sum1", "s1"), false).unwrap());

        let mut changed = sample_summary("sum1", "s1");
        changed.summary = "overwritten".into();
        assert!(import_summary_sync(&conn, &changed, true).unwrap());
        assert_eq!(get_summary_sync(&conn, "sum1").unwrap().summary, "overwritten");
    }

    #[test]
    fn recent_summaries_ordered_newest_first() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        seed_session(&conn, "s2", "/proj");
        let mut older = sample_summary("a", "s1");
        older.created_at = "2026-01-01T00:00:00Z".into();
        let mut newer = sample_summary("b", "s2");
        newer.created_at = "2026-01-02T00:00:00Z".into();
        upsert_summary_sync(&conn, &older).unwrap();
        upsert_summary_sync(&conn, &newer).unwrap();

        let summaries = list_recent_summaries_sync(&conn, 10).unwrap();
        assert_eq!(summaries[0].id, "b");
        assert_eq!(summaries[1].id, "a");
    }
}
