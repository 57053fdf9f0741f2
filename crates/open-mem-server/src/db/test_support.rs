// crates/open-mem-server/src/db/test_support.rs
// Shared test helpers for database tests

use open_mem_types::{Observation, ObservationType, SessionSummary};
use rusqlite::Connection;
use std::sync::Arc;

use super::pool::DatabasePool;

/// Create a test pool (in-memory project DB, vectors disabled).
pub async fn setup_test_pool() -> Arc<DatabasePool> {
    Arc::new(
        DatabasePool::open_in_memory(0)
            .await
            .expect("Failed to open in-memory pool"),
    )
}

/// Create a sync in-memory project connection with all migrations applied.
/// Use this for sync repository tests that don't need pool semantics.
pub fn setup_test_connection() -> Connection {
    super::pool::ensure_sqlite_vec_registered();
    let conn = Connection::open_in_memory().unwrap();
    conn.execute_batch("PRAGMA foreign_keys=ON;").unwrap();
    super::schema::run_project_migrations(&conn, 0).unwrap();
    conn
}

/// Sync in-memory user-scope connection with migrations applied.
pub fn setup_user_test_connection() -> Connection {
    super::pool::ensure_sqlite_vec_registered();
    let conn = Connection::open_in_memory().unwrap();
    super::schema::run_user_migrations(&conn).unwrap();
    conn
}

/// Seed a session row.
pub fn seed_session(conn: &Connection, session_id: &str, project_path: &str) {
    super::get_or_create_session_sync(conn, session_id, project_path).unwrap();
}

/// A filled-in observation with deterministic defaults for tests.
pub fn sample_observation(id: &str, session_id: &str, title: &str) -> Observation {
    Observation {
        id: id.to_string(),
        session_id: session_id.to_string(),
        kind: ObservationType::Discovery,
        title: title.to_string(),
        subtitle: String::new(),
        facts: vec![],
        narrative: format!("narrative for {title}"),
        concepts: vec![],
        files_read: vec![],
        files_modified: vec![],
        raw_tool_output: "raw output".to_string(),
        tool_name: "Read".to_string(),
        created_at: "2026-01-15T12:00:00Z".to_string(),
        token_count: 25,
        discovery_tokens: 400,
        importance: 3,
        superseded_by: None,
        superseded_at: None,
        deleted_at: None,
    }
}

/// A filled-in session summary for tests.
pub fn sample_summary(id: &str, session_id: &str) -> SessionSummary {
    SessionSummary {
        id: id.to_string(),
        session_id: session_id.to_string(),
        summary: "worked on things".to_string(),
        key_decisions: vec!["kept sqlite".to_string()],
        files_modified: vec!["src/lib.rs".to_string()],
        concepts: vec!["storage".to_string()],
        created_at: "2026-01-15T13:00:00Z".to_string(),
        token_count: 40,
        request: None,
        investigated: None,
        learned: None,
        completed: None,
        next_steps: None,
    }
}
