// crates/open-mem-server/src/db/migration_helpers.rs
// Database migration helper utilities

use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

/// Check if a table exists in the database
pub fn table_exists(conn: &Connection, table_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type='table' AND name=?",
        [table_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Check if a column exists in a table
pub fn column_exists(conn: &Connection, table_name: &str, column_name: &str) -> bool {
    conn.query_row(
        "SELECT 1 FROM pragma_table_info(?) WHERE name=?",
        [table_name, column_name],
        |_| Ok(true),
    )
    .unwrap_or(false)
}

/// Add a column to a table if it doesn't already exist
pub fn add_column_if_missing(
    conn: &Connection,
    table_name: &str,
    column_name: &str,
    column_def: &str,
) -> Result<()> {
    if column_exists(conn, table_name, column_name) {
        return Ok(());
    }

    info!("Migrating {} to add {} column", table_name, column_name);
    let sql = format!(
        "ALTER TABLE {} ADD COLUMN {} {}",
        table_name, column_name, column_def
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// Current schema version, recorded in `schema_version` and advanced
/// monotonically on open.
pub const SCHEMA_VERSION: i64 = 1;

/// Read the recorded schema version (0 for a fresh database).
pub fn recorded_schema_version(conn: &Connection) -> i64 {
    if !table_exists(conn, "schema_version") {
        return 0;
    }
    conn.query_row("SELECT MAX(version) FROM schema_version", [], |row| {
        row.get::<_, Option<i64>>(0)
    })
    .ok()
    .flatten()
    .unwrap_or(0)
}

/// Record that the schema is now at `version`.
pub fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")?;
    conn.execute(
        "INSERT INTO schema_version (version) SELECT ?1
         WHERE NOT EXISTS (SELECT 1 FROM schema_version WHERE version >= ?1)",
        [version],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_exists_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!table_exists(&conn, "test_table"));
        conn.execute("CREATE TABLE test_table (id INTEGER)", [])
            .unwrap();
        assert!(table_exists(&conn, "test_table"));
    }

    #[test]
    fn test_column_exists_in_memory() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test_table (id INTEGER, name TEXT)", [])
            .unwrap();
        assert!(column_exists(&conn, "test_table", "id"));
        assert!(!column_exists(&conn, "test_table", "email"));
    }

    #[test]
    fn test_add_column_if_missing_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute("CREATE TABLE test_table (id INTEGER)", [])
            .unwrap();
        add_column_if_missing(&conn, "test_table", "name", "TEXT").unwrap();
        assert!(column_exists(&conn, "test_table", "name"));
        add_column_if_missing(&conn, "test_table", "name", "TEXT").unwrap();
    }

    #[test]
    fn test_schema_version_monotonic() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(recorded_schema_version(&conn), 0);
        record_schema_version(&conn, 1).unwrap();
        assert_eq!(recorded_schema_version(&conn), 1);
        // Recording an older version never regresses
        record_schema_version(&conn, 1).unwrap();
        assert_eq!(recorded_schema_version(&conn), 1);
    }
}
