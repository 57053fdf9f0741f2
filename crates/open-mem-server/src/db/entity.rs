// crates/open-mem-server/src/db/entity.rs
// Optional graph layer: entities, directed relations, observation mentions

use open_mem_types::Observation;
use rusqlite::{Connection, OptionalExtension, params};

use super::log_and_discard;
use crate::utils::{new_id, now_rfc3339};

/// Find or create an entity. Case-insensitively unique by `(name, type)`.
pub fn ensure_entity_sync(
    conn: &Connection,
    name: &str,
    entity_type: &str,
) -> rusqlite::Result<String> {
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM entities WHERE lower(name) = lower(?1) AND entity_type = ?2",
            params![name, entity_type],
            |row| row.get(0),
        )
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = new_id();
    conn.execute(
        "INSERT INTO entities (id, name, entity_type, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![id, name, entity_type, now_rfc3339()],
    )?;
    Ok(id)
}

/// Record a directed relation; duplicates coalesce via the unique index.
pub fn add_relation_sync(
    conn: &Connection,
    subject_id: &str,
    predicate: &str,
    object_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO relations (subject_id, predicate, object_id) VALUES (?1, ?2, ?3)",
        params![subject_id, predicate, object_id],
    )?;
    Ok(())
}

/// Link an observation to an entity it mentions.
pub fn add_mention_sync(
    conn: &Connection,
    observation_id: &str,
    entity_id: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO mentions (observation_id, entity_id) VALUES (?1, ?2)",
        params![observation_id, entity_id],
    )?;
    Ok(())
}

/// Extract graph rows from a freshly persisted observation: file entities
/// from touched paths, concept entities from tags, mention links for all
/// of them, and a `touches` relation from each concept to each file.
pub fn extract_entities_for_observation_sync(
    conn: &Connection,
    obs: &Observation,
) -> rusqlite::Result<()> {
    let mut file_ids = Vec::new();
    for path in obs.files_read.iter().chain(obs.files_modified.iter()) {
        let id = ensure_entity_sync(conn, path, "file")?;
        add_mention_sync(conn, &obs.id, &id)?;
        file_ids.push(id);
    }

    for concept in &obs.concepts {
        let concept_id = ensure_entity_sync(conn, concept, "concept")?;
        add_mention_sync(conn, &obs.id, &concept_id)?;
        for file_id in &file_ids {
            add_relation_sync(conn, &concept_id, "touches", file_id)?;
        }
    }
    Ok(())
}

/// Look up entity ids for a set of candidate names (case-insensitive,
/// any type).
pub fn entity_ids_by_names_sync(conn: &Connection, names: &[String]) -> Vec<String> {
    let mut ids = Vec::new();
    for name in names {
        let mut stmt = match conn.prepare("SELECT id FROM entities WHERE lower(name) = lower(?1)")
        {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::warn!("entity lookup failed: {e}");
                return ids;
            }
        };
        match stmt.query_map([name], |row| row.get::<_, String>(0)) {
            Ok(rows) => ids.extend(rows.filter_map(log_and_discard)),
            Err(e) => tracing::warn!("entity lookup failed: {e}"),
        }
    }
    ids
}

/// Entities one relation hop away (either direction) from the given set.
pub fn neighbor_entities_sync(conn: &Connection, entity_ids: &[String]) -> Vec<String> {
    let mut neighbors = Vec::new();
    for id in entity_ids {
        let mut stmt = match conn.prepare(
            "SELECT object_id FROM relations WHERE subject_id = ?1
             UNION
             SELECT subject_id FROM relations WHERE object_id = ?1",
        ) {
            Ok(stmt) => stmt,
            Err(e) => {
                tracing::warn!("relation traversal failed: {e}");
                return neighbors;
            }
        };
        match stmt.query_map([id], |row| row.get::<_, String>(0)) {
            Ok(rows) => neighbors.extend(rows.filter_map(log_and_discard)),
            Err(e) => tracing::warn!("relation traversal failed: {e}"),
        }
    }
    neighbors
}

/// Current observation ids mentioning any of the given entities, newest
/// first.
pub fn observations_mentioning_entities_sync(
    conn: &Connection,
    entity_ids: &[String],
    limit: usize,
) -> Vec<String> {
    if entity_ids.is_empty() {
        return Vec::new();
    }
    // Bounded IN-list keeps us inside SQLite's parameter limit
    let capped: Vec<&String> = entity_ids.iter().take(50).collect();
    let placeholders: Vec<String> = (0..capped.len()).map(|i| format!("?{}", i + 2)).collect();
    let sql = format!(
        "SELECT DISTINCT o.id FROM observations o
         JOIN mentions m ON m.observation_id = o.id
         WHERE m.entity_id IN ({})
           AND o.superseded_by IS NULL AND o.deleted_at IS NULL
         ORDER BY o.created_at DESC
         LIMIT ?1",
        placeholders.join(", ")
    );

    let mut stmt = match conn.prepare(&sql) {
        Ok(stmt) => stmt,
        Err(e) => {
            tracing::warn!("mention query failed: {e}");
            return Vec::new();
        }
    };
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(limit as i64)];
    for id in &capped {
        values.push(Box::new((*id).clone()));
    }
    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    match stmt.query_map(refs.as_slice(), |row| row.get::<_, String>(0)) {
        Ok(rows) => rows.filter_map(log_and_discard).collect(),
        Err(e) => {
            tracing::warn!("mention query failed: {e}");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::{sample_observation, seed_session, setup_test_connection};

    #[test]
    fn entities_unique_case_insensitive() {
        let conn = setup_test_connection();
        let a = ensure_entity_sync(&conn, "Tokio", "library").unwrap();
        let b = ensure_entity_sync(&conn, "tokio", "library").unwrap();
        assert_eq!(a, b);
        // Same name, different type is a different entity
        let c = ensure_entity_sync(&conn, "tokio", "concept").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn relations_coalesce_duplicates() {
        let conn = setup_test_connection();
        let a = ensure_entity_sync(&conn, "auth", "concept").unwrap();
        let b = ensure_entity_sync(&conn, "src/auth.rs", "file").unwrap();
        add_relation_sync(&conn, &a, "touches", &b).unwrap();
        add_relation_sync(&conn, &a, "touches", &b).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn extraction_builds_mentions_and_relations() {
        let conn = setup_test_connection();
        seed_session(&conn, "s1", "/proj");
        let mut obs = sample_observation("o1", "s1", "Auth fix");
        obs.concepts = vec!["auth".into()];
        obs.files_modified = vec!["src/auth.rs".into()];
        crate::db::create_observation_sync(&conn, &obs).unwrap();
        extract_entities_for_observation_sync(&conn, &obs).unwrap();

        let ids = entity_ids_by_names_sync(&conn, &["auth".to_string()]);
        assert_eq!(ids.len(), 1);

        let neighbors = neighbor_entities_sync(&conn, &ids);
        assert_eq!(neighbors.len(), 1, "concept relates to its file");

        let mut reachable = ids.clone();
        reachable.extend(neighbors);
        let mentioned = observations_mentioning_entities_sync(&conn, &reachable, 10);
        assert_eq!(mentioned, vec!["o1".to_string()]);
    }

    #[test]
    fn traversal_is_empty_without_matches() {
        let conn = setup_test_connection();
        assert!(entity_ids_by_names_sync(&conn, &["ghost".to_string()]).is_empty());
        assert!(observations_mentioning_entities_sync(&conn, &[], 10).is_empty());
    }
}
