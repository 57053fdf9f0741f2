// crates/open-mem-server/src/db/user.rs
// Cross-project user-scope observation store (separate database file)

use open_mem_types::{ObservationType, UserObservation};
use rusqlite::{Connection, Row, params};

use super::fts::FtsFilters;
use super::{log_and_discard, parse_json_array_column, to_json_array};
use crate::utils::now_rfc3339;

const USER_COLUMNS: &str = "id, type, title, subtitle, facts, narrative, concepts, files_read, \
     files_modified, source_project, created_at, token_count, importance, deleted_at";

/// Parse one user_observations row (column order per `USER_COLUMNS`).
pub fn parse_user_observation_row(row: &Row<'_>) -> rusqlite::Result<UserObservation> {
    Ok(UserObservation {
        id: row.get(0)?,
        kind: ObservationType::from_str_lossy(&row.get::<_, String>(1)?),
        title: row.get(2)?,
        subtitle: row.get(3)?,
        facts: parse_json_array_column(4, row.get(4)?)?,
        narrative: row.get(5)?,
        concepts: parse_json_array_column(6, row.get(6)?)?,
        files_read: parse_json_array_column(7, row.get(7)?)?,
        files_modified: parse_json_array_column(8, row.get(8)?)?,
        source_project: row.get(9)?,
        created_at: row.get(10)?,
        token_count: row.get(11)?,
        importance: row.get(12)?,
        deleted_at: row.get(13)?,
    })
}

/// Insert one user-scope observation.
pub fn insert_user_observation_sync(
    conn: &Connection,
    obs: &UserObservation,
) -> rusqlite::Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO user_observations ({USER_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            obs.id,
            obs.kind.as_str(),
            obs.title,
            obs.subtitle,
            to_json_array(&obs.facts),
            obs.narrative,
            to_json_array(&obs.concepts),
            to_json_array(&obs.files_read),
            to_json_array(&obs.files_modified),
            obs.source_project,
            obs.created_at,
            obs.token_count,
            obs.importance,
            obs.deleted_at,
        ],
    )?;
    Ok(())
}

/// FTS search over live user-scope observations. Results carry the same
/// BM25 ordering as the project search; the caller appends them after
/// project results and tags them `source: "user"`.
pub fn user_fts_search_sync(
    conn: &Connection,
    query: &str,
    filters: &FtsFilters,
    limit: usize,
) -> rusqlite::Result<Vec<(UserObservation, f64)>> {
    let match_query = super::fts::build_match_query(query, filters);
    if match_query.is_empty() {
        return Ok(Vec::new());
    }

    let columns: String = USER_COLUMNS
        .split(", ")
        .map(|c| format!("o.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {columns}, user_observations_fts.rank
         FROM user_observations_fts
         JOIN user_observations o ON o.rowid = user_observations_fts.rowid
         WHERE user_observations_fts MATCH ?1 AND o.deleted_at IS NULL
         ORDER BY user_observations_fts.rank
         LIMIT ?2"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![match_query, limit as i64], |row| {
            Ok((parse_user_observation_row(row)?, row.get(14)?))
        })?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}

/// Most recent live user observations, newest first.
pub fn list_recent_user_observations_sync(
    conn: &Connection,
    limit: usize,
) -> rusqlite::Result<Vec<UserObservation>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {USER_COLUMNS} FROM user_observations
         WHERE deleted_at IS NULL
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1"
    ))?;
    let rows = stmt
        .query_map([limit as i64], parse_user_observation_row)?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}

/// Soft-delete a user observation.
pub fn tombstone_user_observation_sync(conn: &Connection, id: &str) -> rusqlite::Result<bool> {
    let updated = conn.execute(
        "UPDATE user_observations SET deleted_at = ?1 WHERE id = ?2 AND deleted_at IS NULL",
        params![now_rfc3339(), id],
    )?;
    Ok(updated > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_user_test_connection;

    fn sample_user_obs(id: &str, title: &str) -> UserObservation {
        UserObservation {
            id: id.to_string(),
            kind: ObservationType::Discovery,
            title: title.to_string(),
            subtitle: String::new(),
            facts: vec![],
            narrative: "narrative".to_string(),
            concepts: vec!["testing".to_string()],
            files_read: vec![],
            files_modified: vec![],
            source_project: "/proj".to_string(),
            created_at: now_rfc3339(),
            token_count: 12,
            importance: 3,
            deleted_at: None,
        }
    }

    #[test]
    fn insert_and_search() {
        let conn = setup_user_test_connection();
        insert_user_observation_sync(&conn, &sample_user_obs("u1", "Prefers explicit errors"))
            .unwrap();

        let hits = user_fts_search_sync(&conn, "explicit", &FtsFilters::default(), 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0.id, "u1");
        assert_eq!(hits[0].0.source_project, "/proj");
    }

    #[test]
    fn tombstoned_rows_drop_out() {
        let conn = setup_user_test_connection();
        insert_user_observation_sync(&conn, &sample_user_obs("u1", "Something")).unwrap();
        assert!(tombstone_user_observation_sync(&conn, "u1").unwrap());

        assert!(user_fts_search_sync(&conn, "Something", &FtsFilters::default(), 10)
            .unwrap()
            .is_empty());
        assert!(list_recent_user_observations_sync(&conn, 10).unwrap().is_empty());
    }
}
