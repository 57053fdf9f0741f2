// crates/open-mem-server/src/db/export.rs
// Versioned JSON export/import with idempotent primary-key semantics

use open_mem_types::{EXPORT_VERSION, ExportEnvelope, ImportStats, Observation};
use rusqlite::Connection;

use super::log_and_discard;
use super::observation::{OBSERVATION_COLUMNS, parse_observation_row};
use super::summary::{import_summary_sync, parse_summary_row};
use crate::utils::now_rfc3339;

/// Duplicate handling on import.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportMode {
    /// Rows whose primary key already exists are left untouched.
    #[default]
    SkipDuplicates,
    /// Existing rows are replaced wholesale.
    Overwrite,
}

/// Serialize all observations (current and historical) and summaries into
/// the versioned envelope. `include_raw` controls whether raw tool output
/// travels along.
pub fn export_envelope_sync(
    conn: &Connection,
    project: &str,
    include_raw: bool,
) -> rusqlite::Result<ExportEnvelope> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {OBSERVATION_COLUMNS} FROM observations ORDER BY created_at ASC, rowid ASC"
    ))?;
    let mut observations: Vec<Observation> = stmt
        .query_map([], parse_observation_row)?
        .filter_map(log_and_discard)
        .collect();
    if !include_raw {
        for obs in &mut observations {
            obs.raw_tool_output = String::new();
        }
    }

    let mut stmt = conn.prepare(
        "SELECT id, session_id, summary, key_decisions, files_modified, concepts, created_at, \
         token_count, request, investigated, learned, completed, next_steps
         FROM session_summaries ORDER BY created_at ASC, rowid ASC",
    )?;
    let summaries = stmt
        .query_map([], parse_summary_row)?
        .filter_map(log_and_discard)
        .collect();

    Ok(ExportEnvelope {
        version: EXPORT_VERSION,
        exported_at: now_rfc3339(),
        project: project.to_string(),
        observations,
        summaries,
    })
}

/// Import an envelope. Idempotent by primary key: `skip-duplicates`
/// leaves existing rows alone; `overwrite` replaces them. Sessions
/// referenced by imported observations are stubbed in as completed so
/// foreign keys hold on a fresh database.
pub fn import_envelope_sync(
    conn: &Connection,
    envelope: &ExportEnvelope,
    mode: ImportMode,
) -> anyhow::Result<ImportStats> {
    if envelope.version != EXPORT_VERSION {
        anyhow::bail!(
            "unsupported export version {} (expected {})",
            envelope.version,
            EXPORT_VERSION
        );
    }

    let mut stats = ImportStats::default();
    let overwrite = mode == ImportMode::Overwrite;

    for obs in &envelope.observations {
        ensure_session_stub(conn, &obs.session_id, &envelope.project)?;

        let exists: bool = conn
            .query_row("SELECT 1 FROM observations WHERE id = ?1", [&obs.id], |_| {
                Ok(true)
            })
            .unwrap_or(false);

        if exists {
            if !overwrite {
                stats.skipped += 1;
                continue;
            }
            conn.execute("DELETE FROM observations WHERE id = ?1", [&obs.id])?;
            super::observation::insert_observation_row_sync(conn, obs)?;
            stats.overwritten += 1;
        } else {
            super::observation::insert_observation_row_sync(conn, obs)?;
            stats.imported += 1;
        }
    }

    for summary in &envelope.summaries {
        ensure_session_stub(conn, &summary.session_id, &envelope.project)?;
        if import_summary_sync(conn, summary, overwrite)? {
            stats.summaries_imported += 1;
        } else {
            stats.summaries_skipped += 1;
        }
    }

    // Imported rows recount each session's live observations
    conn.execute(
        "UPDATE sessions SET observation_count = (
             SELECT COUNT(*) FROM observations o
             WHERE o.session_id = sessions.id
               AND o.superseded_by IS NULL AND o.deleted_at IS NULL
         )",
        [],
    )?;

    Ok(stats)
}

/// Create a completed placeholder session so imported rows satisfy the
/// sessions foreign key. Never touches an existing session.
fn ensure_session_stub(
    conn: &Connection,
    session_id: &str,
    project: &str,
) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO sessions (id, project_path, started_at, status)
         VALUES (?1, ?2, ?3, 'completed')
         ON CONFLICT(id) DO NOTHING",
        rusqlite::params![session_id, project, now_rfc3339()],
    )?;
    Ok(())
}
