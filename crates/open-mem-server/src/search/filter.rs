// crates/open-mem-server/src/search/filter.rs
// Filter-only retrieval: structured facets without free text

use open_mem_types::Observation;
use rusqlite::Connection;

use crate::db::FtsFilters;
use crate::db::log_and_discard;

/// Direct structured query over current observations: the `filter-only`
/// strategy for requests that carry facets but no free text. Newest first.
pub fn filter_only_search_sync(
    conn: &Connection,
    filters: &FtsFilters,
    limit: usize,
) -> rusqlite::Result<Vec<Observation>> {
    let mut predicates = vec![
        "superseded_by IS NULL".to_string(),
        "deleted_at IS NULL".to_string(),
    ];
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(limit as i64)];
    let mut next_param = 2;

    if let Some(ref session_id) = filters.session_id {
        predicates.push(format!("session_id = ?{next_param}"));
        values.push(Box::new(session_id.clone()));
        next_param += 1;
    }
    if !filters.types.is_empty() {
        let placeholders: Vec<String> = filters
            .types
            .iter()
            .map(|t| {
                let p = format!("?{next_param}");
                values.push(Box::new(t.as_str().to_string()));
                next_param += 1;
                p
            })
            .collect();
        predicates.push(format!("type IN ({})", placeholders.join(", ")));
    }
    if let Some(min) = filters.importance_min {
        predicates.push(format!("importance >= ?{next_param}"));
        values.push(Box::new(min));
        next_param += 1;
    }
    if let Some(max) = filters.importance_max {
        predicates.push(format!("importance <= ?{next_param}"));
        values.push(Box::new(max));
        next_param += 1;
    }
    if let Some(ref from) = filters.date_from {
        predicates.push(format!("created_at >= ?{next_param}"));
        values.push(Box::new(from.clone()));
        next_param += 1;
    }
    if let Some(ref to) = filters.date_to {
        predicates.push(format!("created_at <= ?{next_param}"));
        values.push(Box::new(to.clone()));
        next_param += 1;
    }
    // Concepts and files live in JSON-array columns; EXISTS over
    // json_each keeps the filter exact (substring LIKE would overmatch)
    for concept in &filters.concepts {
        predicates.push(format!(
            "EXISTS (SELECT 1 FROM json_each(concepts) WHERE json_each.value = ?{next_param})"
        ));
        values.push(Box::new(concept.clone()));
        next_param += 1;
    }
    for file in &filters.files {
        predicates.push(format!(
            "(EXISTS (SELECT 1 FROM json_each(files_read) WHERE json_each.value = ?{next_param})
              OR EXISTS (SELECT 1 FROM json_each(files_modified) WHERE json_each.value = ?{next_param}))"
        ));
        values.push(Box::new(file.clone()));
        next_param += 1;
    }
    let _ = next_param;

    let sql = format!(
        "SELECT id, session_id, type, title, subtitle, facts, narrative, concepts, files_read, \
         files_modified, raw_tool_output, tool_name, created_at, token_count, discovery_tokens, \
         importance, superseded_by, superseded_at, deleted_at
         FROM observations
         WHERE {}
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?1",
        predicates.join(" AND ")
    );

    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt
        .query_map(refs.as_slice(), crate::db::parse_observation_row)?
        .filter_map(log_and_discard)
        .collect();
    Ok(rows)
}
