// crates/open-mem-server/src/db/schema.rs
// Database schema and migrations

use anyhow::Result;
use rusqlite::Connection;

use super::migration_helpers::{
    SCHEMA_VERSION, add_column_if_missing, record_schema_version, recorded_schema_version,
    table_exists,
};

/// Run all project-database schema setup and migrations.
///
/// Called during database initialization. Idempotent: existing tables and
/// columns are checked before changes. `embedding_dimension` sizes the
/// vector table; zero (or a missing sqlite-vec extension) skips it.
pub fn run_project_migrations(conn: &Connection, embedding_dimension: usize) -> Result<()> {
    let from_version = recorded_schema_version(conn);

    conn.execute_batch(PROJECT_SCHEMA)?;
    migrate_observation_fts(conn)?;
    migrate_vec_observations(conn, embedding_dimension)?;
    migrate_pending_failed_at(conn)?;

    record_schema_version(conn, SCHEMA_VERSION)?;
    if from_version < SCHEMA_VERSION {
        tracing::info!(
            "schema migrated from version {} to {}",
            from_version,
            SCHEMA_VERSION
        );
    }
    Ok(())
}

/// Run user-database (cross-project scope) migrations.
pub fn run_user_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(USER_SCHEMA)?;
    migrate_user_fts(conn)?;
    record_schema_version(conn, SCHEMA_VERSION)?;
    Ok(())
}

/// Whether the sqlite-vec extension is actually loaded on this connection.
///
/// Availability is runtime-detected; when absent, vector search uses the
/// in-memory cosine fallback over recent embeddings instead.
pub fn vector_extension_available(conn: &Connection) -> bool {
    conn.query_row("SELECT vec_version()", [], |_| Ok(true))
        .unwrap_or(false)
}

/// Create the vector index if the extension is present and a non-zero
/// dimension is configured. Dimension is fixed at creation: a changed
/// dimension drops and recreates the table (embeddings refill lazily).
fn migrate_vec_observations(conn: &Connection, dimension: usize) -> Result<()> {
    if dimension == 0 || !vector_extension_available(conn) {
        return Ok(());
    }

    if table_exists(conn, "vec_observations") {
        let current: Option<i64> = conn
            .query_row(
                "SELECT vector_column_size FROM vec_observations_info
                 WHERE vector_column_name = 'embedding'",
                [],
                |row| row.get(0),
            )
            .ok();
        match current {
            Some(dim) if dim as usize == dimension => return Ok(()),
            Some(dim) => {
                tracing::info!(
                    "vector dimension changed {} -> {}, rebuilding index",
                    dim,
                    dimension
                );
                conn.execute_batch("DROP TABLE IF EXISTS vec_observations")?;
                conn.execute("UPDATE observations SET embedding = NULL", [])?;
            }
            // Info table unreadable: recreate from scratch
            None => {
                conn.execute_batch("DROP TABLE IF EXISTS vec_observations")?;
            }
        }
    }

    conn.execute(
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS vec_observations USING vec0(
                embedding float[{dimension}],
                +observation_id TEXT
            )"
        ),
        [],
    )?;
    Ok(())
}

/// Create the contentless FTS5 projection and its maintenance triggers.
///
/// Triggered from the base table so the index is never stale; every
/// searchable text column of an observation is indexed.
fn migrate_observation_fts(conn: &Connection) -> Result<()> {
    if table_exists(conn, "observations_fts") {
        return Ok(());
    }

    tracing::info!("creating observations FTS index");
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS observations_fts USING fts5(
            title,
            subtitle,
            narrative,
            facts,
            concepts,
            files_read,
            files_modified,
            content='',
            contentless_delete=1,
            tokenize='porter unicode61 remove_diacritics 1'
        );

        CREATE TRIGGER IF NOT EXISTS observations_fts_ai AFTER INSERT ON observations BEGIN
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
            VALUES (new.rowid, new.title, new.subtitle, new.narrative, new.facts, new.concepts, new.files_read, new.files_modified);
        END;

        CREATE TRIGGER IF NOT EXISTS observations_fts_ad AFTER DELETE ON observations BEGIN
            DELETE FROM observations_fts WHERE rowid = old.rowid;
        END;

        CREATE TRIGGER IF NOT EXISTS observations_fts_au AFTER UPDATE OF
            title, subtitle, narrative, facts, concepts, files_read, files_modified
        ON observations BEGIN
            DELETE FROM observations_fts WHERE rowid = old.rowid;
            INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
            VALUES (new.rowid, new.title, new.subtitle, new.narrative, new.facts, new.concepts, new.files_read, new.files_modified);
        END;",
    )?;

    // Populate from any pre-existing rows (databases created before FTS)
    conn.execute(
        "INSERT INTO observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
         SELECT rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified
         FROM observations",
        [],
    )?;
    Ok(())
}

/// FTS for the user-scope database, same column set.
fn migrate_user_fts(conn: &Connection) -> Result<()> {
    if table_exists(conn, "user_observations_fts") {
        return Ok(());
    }
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS user_observations_fts USING fts5(
            title,
            subtitle,
            narrative,
            facts,
            concepts,
            files_read,
            files_modified,
            content='',
            contentless_delete=1,
            tokenize='porter unicode61 remove_diacritics 1'
        );

        CREATE TRIGGER IF NOT EXISTS user_obs_fts_ai AFTER INSERT ON user_observations BEGIN
            INSERT INTO user_observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
            VALUES (new.rowid, new.title, new.subtitle, new.narrative, new.facts, new.concepts, new.files_read, new.files_modified);
        END;

        CREATE TRIGGER IF NOT EXISTS user_obs_fts_ad AFTER DELETE ON user_observations BEGIN
            DELETE FROM user_observations_fts WHERE rowid = old.rowid;
        END;

        CREATE TRIGGER IF NOT EXISTS user_obs_fts_au AFTER UPDATE OF
            title, subtitle, narrative, facts, concepts, files_read, files_modified
        ON user_observations BEGIN
            DELETE FROM user_observations_fts WHERE rowid = old.rowid;
            INSERT INTO user_observations_fts(rowid, title, subtitle, narrative, facts, concepts, files_read, files_modified)
            VALUES (new.rowid, new.title, new.subtitle, new.narrative, new.facts, new.concepts, new.files_read, new.files_modified);
        END;",
    )?;
    Ok(())
}

/// Add `failed_at` to pending_messages for databases created before the
/// retry-backoff window was tracked.
fn migrate_pending_failed_at(conn: &Connection) -> Result<()> {
    if !table_exists(conn, "pending_messages") {
        return Ok(());
    }
    add_column_if_missing(conn, "pending_messages", "failed_at", "TEXT")
}

/// Project database schema
pub const PROJECT_SCHEMA: &str = r#"
-- ═══════════════════════════════════════
-- SESSIONS
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    project_path TEXT NOT NULL,
    started_at TEXT NOT NULL,
    ended_at TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    observation_count INTEGER NOT NULL DEFAULT 0,
    summary_id TEXT
);
CREATE INDEX IF NOT EXISTS idx_sessions_project ON sessions(project_path, started_at DESC);

-- ═══════════════════════════════════════
-- OBSERVATIONS
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS observations (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES sessions(id),
    type TEXT NOT NULL DEFAULT 'discovery',
    title TEXT NOT NULL,
    subtitle TEXT NOT NULL DEFAULT '',
    facts TEXT NOT NULL DEFAULT '[]',           -- JSON array
    narrative TEXT NOT NULL DEFAULT '',
    concepts TEXT NOT NULL DEFAULT '[]',        -- JSON array
    files_read TEXT NOT NULL DEFAULT '[]',      -- JSON array
    files_modified TEXT NOT NULL DEFAULT '[]',  -- JSON array
    raw_tool_output TEXT NOT NULL DEFAULT '',
    tool_name TEXT NOT NULL,
    created_at TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    discovery_tokens INTEGER NOT NULL DEFAULT 0, -- 0 = unknown
    importance INTEGER NOT NULL DEFAULT 3,
    embedding BLOB,                              -- f32 little-endian, late-filled
    superseded_by TEXT,
    superseded_at TEXT,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_observations_session ON observations(session_id);
CREATE INDEX IF NOT EXISTS idx_observations_created ON observations(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_observations_no_embedding
    ON observations(created_at DESC) WHERE embedding IS NULL;

-- ═══════════════════════════════════════
-- SESSION SUMMARIES (zero or one per session)
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS session_summaries (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL UNIQUE REFERENCES sessions(id),
    summary TEXT NOT NULL,
    key_decisions TEXT NOT NULL DEFAULT '[]',   -- JSON array
    files_modified TEXT NOT NULL DEFAULT '[]',  -- JSON array
    concepts TEXT NOT NULL DEFAULT '[]',        -- JSON array
    created_at TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    request TEXT,
    investigated TEXT,
    learned TEXT,
    completed TEXT,
    next_steps TEXT
);

-- ═══════════════════════════════════════
-- PENDING QUEUE (durable ingest queue)
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS pending_messages (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL,
    tool_name TEXT NOT NULL,
    tool_output TEXT NOT NULL,
    call_id TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    retry_count INTEGER NOT NULL DEFAULT 0,
    error TEXT,
    failed_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_pending_claim ON pending_messages(status, created_at, id);

-- ═══════════════════════════════════════
-- GRAPH LAYER
-- ═══════════════════════════════════════
CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS uniq_entities_name_type
    ON entities(lower(name), entity_type);

CREATE TABLE IF NOT EXISTS relations (
    subject_id TEXT NOT NULL REFERENCES entities(id),
    predicate TEXT NOT NULL,
    object_id TEXT NOT NULL REFERENCES entities(id),
    UNIQUE(subject_id, predicate, object_id)
);
CREATE INDEX IF NOT EXISTS idx_relations_subject ON relations(subject_id);
CREATE INDEX IF NOT EXISTS idx_relations_object ON relations(object_id);

CREATE TABLE IF NOT EXISTS mentions (
    observation_id TEXT NOT NULL REFERENCES observations(id),
    entity_id TEXT NOT NULL REFERENCES entities(id),
    UNIQUE(observation_id, entity_id)
);
CREATE INDEX IF NOT EXISTS idx_mentions_entity ON mentions(entity_id);
"#;

/// User (cross-project) database schema
pub const USER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_observations (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL DEFAULT 'discovery',
    title TEXT NOT NULL,
    subtitle TEXT NOT NULL DEFAULT '',
    facts TEXT NOT NULL DEFAULT '[]',
    narrative TEXT NOT NULL DEFAULT '',
    concepts TEXT NOT NULL DEFAULT '[]',
    files_read TEXT NOT NULL DEFAULT '[]',
    files_modified TEXT NOT NULL DEFAULT '[]',
    source_project TEXT NOT NULL,
    created_at TEXT NOT NULL,
    token_count INTEGER NOT NULL DEFAULT 0,
    importance INTEGER NOT NULL DEFAULT 3,
    deleted_at TEXT
);
CREATE INDEX IF NOT EXISTS idx_user_obs_created ON user_observations(created_at DESC);
CREATE INDEX IF NOT EXISTS idx_user_obs_project ON user_observations(source_project);
"#;
