// crates/open-mem-server/src/db/mod.rs
// Unified database layer with rusqlite + sqlite-vec

mod entity;
mod export;
mod fts;
mod migration_helpers;
mod observation;
mod pending;
pub mod pool;
mod retention;
mod schema;
mod session;
mod summary;
#[cfg(test)]
pub mod test_support;
mod user;
mod vector;

pub use entity::{
    add_mention_sync, add_relation_sync, ensure_entity_sync, entity_ids_by_names_sync,
    extract_entities_for_observation_sync, neighbor_entities_sync,
    observations_mentioning_entities_sync,
};
pub use export::{ImportMode, export_envelope_sync, import_envelope_sync};
pub use fts::{FtsFilters, FtsHit, build_match_query, fts_search_sync};
pub use migration_helpers::{SCHEMA_VERSION, column_exists, table_exists};
pub use observation::{
    count_current_observations_sync, create_observation_sync, get_observation_sync,
    get_observations_by_ids_sync, insert_observation_row_sync, list_recent_observations_sync,
    list_session_observations_sync, observation_timeline_sync, observations_without_embedding_sync,
    parse_observation_row, store_observation_embedding_sync, supersede_observation_sync,
    tombstone_observation_sync,
};
pub use pending::{
    claim_batch_sync, count_pending_by_status_sync, enqueue_pending_sync, mark_pending_completed_sync,
    mark_pending_failed_sync, parse_pending_row, queue_depth_sync, requeue_eligible_failed_sync,
    revert_pending_sync,
};
pub use retention::{enforce_size_cap_sync, run_age_retention_sync};
pub use schema::{run_project_migrations, run_user_migrations, vector_extension_available};
pub use session::{
    get_or_create_session_sync, get_session_sync, list_recent_sessions_sync, mark_completed_sync,
    parse_session_row, update_session_status_sync,
};
pub use summary::{
    delete_summary_for_session_sync, get_summary_by_session_sync, get_summary_sync,
    import_summary_sync, list_recent_summaries_sync, upsert_summary_sync,
};
pub use user::{
    insert_user_observation_sync, list_recent_user_observations_sync, parse_user_observation_row,
    tombstone_user_observation_sync, user_fts_search_sync,
};
pub use vector::{
    bytes_to_embedding, embedding_to_bytes, vector_search_fallback_sync, vector_search_native_sync,
};

/// Log a bad row and drop it from the result set.
///
/// JSON-field corruption and other per-row conversion failures skip the
/// row with a warning instead of failing the whole query.
pub fn log_and_discard<T>(result: rusqlite::Result<T>) -> Option<T> {
    match result {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("skipping corrupt row: {e}");
            None
        }
    }
}

/// Parse a JSON-array text column, surfacing corruption as a rusqlite
/// conversion error (so `log_and_discard` can skip the row).
pub(crate) fn parse_json_array_column(
    column: usize,
    raw: String,
) -> rusqlite::Result<Vec<String>> {
    serde_json::from_str(&raw).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            column,
            rusqlite::types::Type::Text,
            Box::new(e),
        )
    })
}

/// Serialize a string list into its JSON-array column form.
pub(crate) fn to_json_array(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}
