// crates/open-mem-server/src/db/observation.rs
// Observation storage: append-only rows with late-filled embeddings,
// supersede revisions, and soft-delete tombstones

use open_mem_types::{Observation, ObservationType};
use rusqlite::{Connection, Row, params};

use super::{log_and_discard, parse_json_array_column, to_json_array};
use crate::utils::now_rfc3339;

pub(crate) const OBSERVATION_COLUMNS: &str = "id, session_id, type, title, subtitle, facts, \
     narrative, concepts, files_read, files_modified, raw_tool_output, tool_name, created_at, \
     token_count, discovery_tokens, importance, superseded_by, superseded_at, deleted_at";

/// Parse one observations row (column order per `OBSERVATION_COLUMNS`).
/// JSON-array column corruption errors the row; callers discard it with
/// a warning via `log_and_discard`.
pub fn parse_observation_row(row: &Row<'_>) -> rusqlite::Result<Observation> {
    Ok(Observation {
        id: row.get(0)?,
        session_id: row.get(1)?,
        kind: ObservationType::from_str_lossy(&row.get::<_, String>(2)?),
        title: row.get(3)?,
        subtitle: row.get(4)?,
        facts: parse_json_array_column(5, row.get(5)?)?,
        narrative: row.get(6)?,
        concepts: parse_json_array_column(7, row.get(7)?)?,
        files_read: parse_json_array_column(8, row.get(8)?)?,
        files_modified: parse_json_array_column(9, row.get(9)?)?,
        raw_tool_output: row.get(10)?,
        tool_name: row.get(11)?,
        created_at: row.get(12)?,
        token_count: row.get(13)?,
        discovery_tokens: row.get(14)?,
        importance: row.get(15)?,
        superseded_by: row.get(16)?,
        superseded_at: row.get(17)?,
        deleted_at: row.get(18)?,
    })
}

/// Insert one observation row. Does NOT touch the session counter; use
/// [`create_observation_sync`] for the normal ingest path.
pub fn insert_observation_row_sync(conn: &Connection, obs: &Observation) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO observations ({OBSERVATION_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)"
        ),
        params![
            obs.id,
            obs.session_id,
            obs.kind.as_str(),
            obs.title,
            obs.subtitle,
            to_json_array(&obs.facts),
            obs.narrative,
            to_json_array(&obs.concepts),
            to_json_array(&obs.files_read),
            to_json_array(&obs.files_modified),
            obs.raw_tool_output,
            obs.tool_name,
            obs.created_at,
            obs.token_count,
            obs.discovery_tokens,
            obs.importance,
            obs.superseded_by,
            obs.superseded_at,
            obs.deleted_at,
        ],
    )?;
    Ok(())
}

/// Persist a new observation and bump the owning session's counter.
pub fn create_observation_sync(conn: &Connection, obs: &Observation) -> rusqlite::Result<()> {
    insert_observation_row_sync(conn, obs)?;
    conn.execute(
        "UPDATE sessions SET observation_count = observation_count + 1 WHERE id = ?1",
        [&obs.session_id],
    )?;
    Ok(())
}

/// Fetch one observation by id.
pub fn get_observation_sync(conn: &Connection, id: &str) -> Option<Observation> {
    conn.query_row(
        &format!("SELECT {OBSERVATION_COLUMNS} FROM observations WHERE id = ?1"),
        [id],
        parse_observation_row,
    )
    .ok()
}

/// Fetch observations by id, preserving request order.
pub fn get_observations_by_ids_sync(conn: &Connection, ids: &[String]) -> Vec<Observation> {
    let mut result = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(obs) = get_observation_sync(conn, id) {
            result.push(obs);
        }
    }
    result
}

/// Current observations of one session, oldest first (summarization order).
pub fn list_session_observations_sync(
    conn: &Connection,
    session_id: &str,
) -> rusqlite::Result<Vec<Observation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OBSERVATION_COLUMNS} FROM observations
         WHERE session_id = ?1 AND superseded_by IS NULL AND deleted_at IS NULL
         ORDER BY created_at ASC, rowid ASC"
    ))?;
    let rows = stmt
        .query_map([session_id], parse_observation_row)?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}

/// Most recent current observations across all sessions, newest first.
pub fn list_recent_observations_sync(
    conn: &Connection,
    limit: usize,
    types: &[ObservationType],
) -> rusqlite::Result<Vec<Observation>> {
    let rows = if types.is_empty() {
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NULL AND deleted_at IS NULL
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map([limit as i64], parse_observation_row)?
            .filter_map(log_and_discard)
            .collect();
        rows
    } else {
        let placeholders: Vec<String> =
            (0..types.len()).map(|i| format!("?{}", i + 2)).collect();
        let sql = format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NULL AND deleted_at IS NULL
               AND type IN ({})
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1",
            placeholders.join(", ")
        );
        let mut stmt = conn.prepare(&sql)?;
        let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(limit as i64)];
        for t in types {
            values.push(Box::new(t.as_str().to_string()));
        }
        let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
        let rows = stmt
            .query_map(refs.as_slice(), parse_observation_row)?
            .filter_map(log_and_discard)
            .collect();
        rows
    };
    Ok(rows)
}

/// Timeline around an anchor observation: `depth_before` older and
/// `depth_after` newer current rows, chronological order. Without an
/// anchor, the newest `limit` rows.
pub fn observation_timeline_sync(
    conn: &Connection,
    session_id: Option<&str>,
    anchor: Option<&str>,
    depth_before: usize,
    depth_after: usize,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let session_filter = match session_id {
        Some(_) => "AND session_id = ?2",
        None => "AND (?2 IS NULL OR session_id = ?2)",
    };

    let Some(anchor_id) = anchor else {
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NULL AND deleted_at IS NULL {session_filter}
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1"
        ))?;
        let mut rows: Vec<Observation> = stmt
            .query_map(params![limit as i64, session_id], parse_observation_row)?
            .filter_map(log_and_discard)
            .collect();
        rows.reverse();
        return Ok(rows);
    };

    let Some(anchor_obs) = get_observation_sync(conn, anchor_id) else {
        return Ok(Vec::new());
    };

    let mut before: Vec<Observation> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NULL AND deleted_at IS NULL {session_filter}
               AND created_at < ?3
             ORDER BY created_at DESC, rowid DESC
             LIMIT ?1"
        ))?;
        stmt.query_map(
            params![depth_before as i64, session_id, anchor_obs.created_at],
            parse_observation_row,
        )?
        .filter_map(log_and_discard)
        .collect()
    };
    before.reverse();

    let after: Vec<Observation> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT {OBSERVATION_COLUMNS} FROM observations
             WHERE superseded_by IS NULL AND deleted_at IS NULL {session_filter}
               AND created_at > ?3
             ORDER BY created_at ASC, rowid ASC
             LIMIT ?1"
        ))?;
        stmt.query_map(
            params![depth_after as i64, session_id, anchor_obs.created_at],
            parse_observation_row,
        )?
        .filter_map(log_and_discard)
        .collect()
    };

    let mut timeline = before;
    timeline.push(anchor_obs);
    timeline.extend(after);
    timeline.truncate(limit.max(1));
    Ok(timeline)
}

/// Count current (not superseded, not tombstoned) observations.
pub fn count_current_observations_sync(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM observations
         WHERE superseded_by IS NULL AND deleted_at IS NULL",
        [],
        |row| row.get(0),
    )
}

/// Mark `old_id` superseded by `new_id`.
///
/// The replacement must not predate the original (`created_at` ordering is
/// an invariant of the revision chain). Returns false when either row is
/// missing or the ordering would be violated.
pub fn supersede_observation_sync(
    conn: &Connection,
    old_id: &str,
    new_id: &str,
) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE observations SET superseded_by = ?1, superseded_at = ?2
         WHERE id = ?3
           AND superseded_by IS NULL AND deleted_at IS NULL
           AND EXISTS (
               SELECT 1 FROM observations n
               WHERE n.id = ?1 AND n.created_at >= observations.created_at
           )",
        params![new_id, now_rfc3339(), old_id],
    )?;
    Ok(updated > 0)
}

/// Soft-delete (tombstone) an observation.
pub fn tombstone_observation_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE observations SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now_rfc3339(), id],
    )?;
    Ok(updated > 0)
}

/// Current observations still missing an embedding, most recent first.
/// Returns (id, text to embed).
pub fn observations_without_embedding_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "SELECT id, title, subtitle, narrative, concepts FROM observations
         WHERE embedding IS NULL AND superseded_by IS NULL AND deleted_at IS NULL
         ORDER BY created_at DESC
         LIMIT ?1",
    )?;
    let rows = stmt
        .query_map([limit as i64], |row| {
            let id: String = row.get(0)?;
            let title: String = row.get(1)?;
            let subtitle: String = row.get(2)?;
            let narrative: String = row.get(3)?;
            let concepts: String = row.get(4)?;
            Ok((id, format!("{title}\n{subtitle}\n{narrative}\n{concepts}")))
        })?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}

/// Store an embedding for an observation: the blob column always, and the
/// vec0 index row when it exists.
pub fn store_observation_embedding_sync(
    conn: &Connection,
    id: &str,
    embedding: &[f32],
    vector_index: bool,
) -> rusqlite::Result<()> {
    let bytes = super::vector::embedding_to_bytes(embedding);
    conn.execute(
        "UPDATE observations SET embedding = ?1 WHERE id = ?2",
        params![bytes, id],
    )?;
    if vector_index {
        conn.execute(
            "DELETE FROM vec_observations WHERE observation_id = ?1",
            [id],
        )?;
        conn.execute(
            "INSERT INTO vec_observations (embedding, observation_id) VALUES (?1, ?2)",
            params![bytes, id],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{sample_observation, seed_session, setup_test_connection};

    #[test]
    fn create_bumps_session_counter() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");

        create_observation_sync(&conn, &sample_observation("o1", "s1", "First")).unwrap();
        create_observation_sync(&conn, &sample_observation("o2", "s1", "Second")).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT observation_count FROM sessions WHERE id = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn round_trip_preserves_json_fields() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        let mut obs = sample_observation("o1", "s1", "Title");
        obs.facts = vec!["fact one".into(), "fact two".into()];
        obs.files_modified = vec!["src/db/pool.rs".into()];
        create_observation_sync(&conn, &obs).unwrap();

        let loaded = get_observation_sync(&conn, "o1").unwrap();
        assert_eq!(loaded.facts, obs.facts);
        assert_eq!(loaded.files_modified, obs.files_modified);
        assert!(loaded.is_current());
    }

    #[test]
    fn corrupt_json_row_is_skipped_not_fatal() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        create_observation_sync(&conn, &sample_observation("good", "s1", "Fine")).unwrap();
        // Corrupt one row's facts column directly
        create_observation_sync(&conn, &sample_observation("bad", "s1", "Broken")).unwrap();
        conn.execute(
            "UPDATE observations SET facts = 'not-json' WHERE id = 'bad'",
            [],
        )
        .unwrap();

        let rows = list_session_observations_sync(&conn, "s1").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "good");
    }

    #[test]
    fn supersede_enforces_created_at_ordering() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        let mut old = sample_observation("old", "s1", "Old");
        old.created_at = "2026-01-02T00:00:00Z".into();
        let mut newer = sample_observation("new", "s1", "New");
        newer.created_at = "2026-01-03T00:00:00Z".into();
        let mut ancient = sample_observation("ancient", "s1", "Ancient");
        ancient.created_at = "2026-01-01T00:00:00Z".into();
        for obs in [&old, &newer, &ancient] {
            create_observation_sync(&conn, obs).unwrap();
        }

        // A newer replacement is accepted
        assert!(supersede_observation_sync(&conn, "old", "new").unwrap());
        let loaded = get_observation_sync(&conn, "old").unwrap();
        assert_eq!(loaded.superseded_by.as_deref(), Some("new"));
        assert!(!loaded.is_current());

        // An older replacement is rejected
        assert!(!supersede_observation_sync(&conn, "new", "ancient").unwrap());

        // Already-superseded rows can't be superseded again
        assert!(!supersede_observation_sync(&conn, "old", "new").unwrap());
    }

    #[test]
    fn tombstone_excludes_from_listings() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        create_observation_sync(&conn, &sample_observation("o1", "s1", "T")).unwrap();

        assert!(tombstone_observation_sync(&conn, "o1").unwrap());
        assert!(!tombstone_observation_sync(&conn, "o1").unwrap());
        assert_eq!(count_current_observations_sync(&conn).unwrap(), 0);
        assert!(list_session_observations_sync(&conn, "s1").unwrap().is_empty());
        // The row itself still exists (soft delete)
        assert!(get_observation_sync(&conn, "o1").unwrap().deleted_at.is_some());
    }

    #[test]
    fn embedding_backfill_listing_and_store() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        create_observation_sync(&conn, &sample_observation("o1", "s1", "T")).unwrap();

        let missing = observations_without_embedding_sync(&conn, 10).unwrap();
        assert_eq!(missing.len(), 1);
        assert!(missing[0].1.contains('T'));

        store_observation_embedding_sync(&conn, "o1", &[0.1, 0.2, 0.3], false).unwrap();
        assert!(observations_without_embedding_sync(&conn, 10).unwrap().is_empty());
    }

    #[test]
    fn timeline_centers_on_anchor() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        for (i, id) in ["a", "b", "c", "d", "e"].iter().enumerate() {
            let mut obs = sample_observation(id, "s1", id);
            obs.created_at = format!("2026-01-0{}T00:00:00Z", i + 1);
            create_observation_sync(&conn, &obs).unwrap();
        }

        let timeline = observation_timeline_sync(&conn, None, Some("c"), 1, 2, 10).unwrap();
        let ids: Vec<&str> = timeline.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "c", "d", "e"]);
    }

    #[test]
    fn type_filter_on_recent_listing() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        let mut decision = sample_observation("o1", "s1", "D");
        decision.kind = open_mem_types::ObservationType::Decision;
        create_observation_sync(&conn, &decision).unwrap();
        create_observation_sync(&conn, &sample_observation("o2", "s1", "X")).unwrap();

        let only_decisions = list_recent_observations_sync(
            &conn,
            10,
            &[open_mem_types::ObservationType::Decision],
        )
        .unwrap();
        assert_eq!(only_decisions.len(), 1);
        assert_eq!(only_decisions[0].id, "o1");
    }
}
