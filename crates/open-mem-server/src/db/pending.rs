// crates/open-mem-server/src/db/pending.rs
// Durable pending-message queue: the pending table IS the queue

use open_mem_types::{PendingMessage, PendingStatus};
use rusqlite::{Connection, Row, params};

use super::log_and_discard;
use crate::utils::{new_id, now_rfc3339};

/// Terminal retry cap: rows at or above this stay failed.
pub const MAX_RETRIES: i64 = 3;

/// Backoff window before a failed row becomes claimable again.
const RETRY_BACKOFF_SECS: i64 = 60;

const PENDING_COLUMNS: &str =
    "id, session_id, tool_name, tool_output, call_id, created_at, status, retry_count, error";

/// Parse one pending_messages row (column order per `PENDING_COLUMNS`).
pub fn parse_pending_row(row: &Row<'_>) -> rusqlite::Result<PendingMessage> {
    Ok(PendingMessage {
        id: row.get(0)?,
        session_id: row.get(1)?,
        tool_name: row.get(2)?,
        tool_output: row.get(3)?,
        call_id: row.get(4)?,
        created_at: row.get(5)?,
        status: PendingStatus::from_str_lossy(&row.get::<_, String>(6)?),
        retry_count: row.get(7)?,
        error: row.get(8)?,
    })
}

/// Enqueue one captured tool output. Returns the row id.
pub fn enqueue_pending_sync(
    conn: &Connection,
    session_id: &str,
    tool_name: &str,
    tool_output: &str,
    call_id: &str,
) -> rusqlite::Result<String> {
    let id = new_id();
    conn.execute(
        "INSERT INTO pending_messages (id, session_id, tool_name, tool_output, call_id, created_at, status)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending')",
        params![id, session_id, tool_name, tool_output, call_id, now_rfc3339()],
    )?;
    Ok(id)
}

/// Atomically claim up to `n` rows: flips `pending → processing` in FIFO
/// order `(created_at, id)` and returns the claimed messages. Runs in one
/// transaction so two workers never claim the same row.
pub fn claim_batch_sync(conn: &Connection, n: usize) -> rusqlite::Result<Vec<PendingMessage>> {
    let tx = conn.unchecked_transaction()?;
    let claimed: Vec<PendingMessage> = {
        let mut stmt = tx.prepare(&format!(
            "SELECT {PENDING_COLUMNS} FROM pending_messages
             WHERE status = 'pending'
             ORDER BY created_at ASC, id ASC
             LIMIT ?1"
        ))?;
        stmt.query_map([n as i64], parse_pending_row)?
            .filter_map(log_and_discard)
            .collect()
    };
    for message in &claimed {
        tx.execute(
            "UPDATE pending_messages SET status = 'processing' WHERE id = ?1",
            [&message.id],
        )?;
    }
    tx.commit()?;

    Ok(claimed
        .into_iter()
        .map(|mut m| {
            m.status = PendingStatus::Processing;
            m
        })
        .collect())
}

/// Mark a claimed row done.
pub fn mark_pending_completed_sync(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE pending_messages SET status = 'completed', error = NULL WHERE id = ?1",
        [id],
    )?;
    Ok(())
}

/// Mark a claimed row failed, bumping its retry counter. Rows that reach
/// `MAX_RETRIES` stay failed terminally; the rest become claimable again
/// after the backoff window (see [`requeue_eligible_failed_sync`]).
pub fn mark_pending_failed_sync(conn: &Connection, id: &str, error: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE pending_messages
         SET status = 'failed', retry_count = retry_count + 1, error = ?1, failed_at = ?2
         WHERE id = ?3",
        params![error, now_rfc3339(), id],
    )?;
    Ok(())
}

/// Revert a claimed row to `pending` without burning a retry.
/// This is the abort path: a cancelled attempt is not a failure.
pub fn revert_pending_sync(conn: &Connection, id: &str) -> rusqlite::Result<()> {
    conn.execute(
        "UPDATE pending_messages SET status = 'pending' WHERE id = ?1 AND status = 'processing'",
        [id],
    )?;
    Ok(())
}

/// Explicit requeue: failed rows below the retry cap whose backoff window
/// has elapsed re-enter `pending`. Returns the number requeued.
pub fn requeue_eligible_failed_sync(conn: &Connection) -> rusqlite::Result<usize> {
    conn.execute(
        &format!(
            "UPDATE pending_messages SET status = 'pending'
             WHERE status = 'failed'
               AND retry_count < {MAX_RETRIES}
               AND (failed_at IS NULL OR failed_at <= ?1)"
        ),
        [backoff_cutoff()],
    )
}

fn backoff_cutoff() -> String {
    (chrono::Utc::now() - chrono::Duration::seconds(RETRY_BACKOFF_SECS))
        .to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}

/// Number of rows currently claimable.
pub fn queue_depth_sync(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM pending_messages WHERE status = 'pending'",
        [],
        |row| row.get(0),
    )
}

/// Count rows by status (diagnostics and tests).
pub fn count_pending_by_status_sync(
    conn: &Connection,
    status: PendingStatus,
) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM pending_messages WHERE status = ?1",
        [status.as_str()],
        |row| row.get(0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_connection;

    fn enqueue(conn: &Connection, n: usize) -> Vec<String> {
        (0..n)
            .map(|i| {
                enqueue_pending_sync(conn, "s1", "Read", &format!("output {i}"), &format!("c{i}"))
                    .unwrap()
            })
            .collect()
    }

    #[test]
    fn claim_is_fifo_and_flips_status() {
        let conn = setup_test_connection();
        let ids = enqueue(&conn, 3);

        let claimed = claim_batch_sync(&conn, 2).unwrap();
        assert_eq!(claimed.len(), 2);
        assert_eq!(claimed[0].id, ids[0]);
        assert_eq!(claimed[1].id, ids[1]);
        assert!(claimed.iter().all(|m| m.status == PendingStatus::Processing));

        assert_eq!(queue_depth_sync(&conn).unwrap(), 1);
        // A second claim never re-hands out processing rows
        let second = claim_batch_sync(&conn, 10).unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].id, ids[2]);
    }

    #[test]
    fn completed_and_failed_transitions() {
        let conn = setup_test_connection();
        let ids = enqueue(&conn, 2);
        claim_batch_sync(&conn, 2).unwrap();

        mark_pending_completed_sync(&conn, &ids[0]).unwrap();
        mark_pending_failed_sync(&conn, &ids[1], "provider exploded").unwrap();

        assert_eq!(
            count_pending_by_status_sync(&conn, PendingStatus::Completed).unwrap(),
            1
        );
        assert_eq!(
            count_pending_by_status_sync(&conn, PendingStatus::Failed).unwrap(),
            1
        );
        let failed: (i64, Option<String>) = conn
            .query_row(
                "SELECT retry_count, error FROM pending_messages WHERE id = ?1",
                [&ids[1]],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(failed.0, 1);
        assert_eq!(failed.1.as_deref(), Some("provider exploded"));
    }

    #[test]
    fn revert_does_not_burn_a_retry() {
        let conn = setup_test_connection();
        let ids = enqueue(&conn, 1);
        claim_batch_sync(&conn, 1).unwrap();
        revert_pending_sync(&conn, &ids[0]).unwrap();

        let (status, retries): (String, i64) = conn
            .query_row(
                "SELECT status, retry_count FROM pending_messages WHERE id = ?1",
                [&ids[0]],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(status, "pending");
        assert_eq!(retries, 0);
    }

    #[test]
    fn requeue_respects_retry_cap() {
        let conn = setup_test_connection();
        let ids = enqueue(&conn, 2);
        claim_batch_sync(&conn, 2).unwrap();

        // Exhaust retries on the first row
        for _ in 0..MAX_RETRIES {
            mark_pending_failed_sync(&conn, &ids[0], "boom").unwrap();
        }
        mark_pending_failed_sync(&conn, &ids[1], "boom").unwrap();
        // Age both failures past the backoff window
        conn.execute(
            "UPDATE pending_messages SET failed_at = '2020-01-01T00:00:00Z'",
            [],
        )
        .unwrap();

        let requeued = requeue_eligible_failed_sync(&conn).unwrap();
        assert_eq!(requeued, 1);
        assert_eq!(
            count_pending_by_status_sync(&conn, PendingStatus::Failed).unwrap(),
            1,
            "terminally failed row must stay failed"
        );
    }

    #[test]
    fn fresh_failure_waits_out_backoff() {
        let conn = setup_test_connection();
        let ids = enqueue(&conn, 1);
        claim_batch_sync(&conn, 1).unwrap();
        mark_pending_failed_sync(&conn, &ids[0], "boom").unwrap();

        // failed_at is now; the backoff window has not elapsed
        assert_eq!(requeue_eligible_failed_sync(&conn).unwrap(), 0);
    }
}
