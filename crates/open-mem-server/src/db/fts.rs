// crates/open-mem-server/src/db/fts.rs
// FTS5-powered observation search with field-qualified filters

use open_mem_types::{Observation, ObservationType};
use rusqlite::Connection;

use super::log_and_discard;
use super::observation::{OBSERVATION_COLUMNS, parse_observation_row};

/// Structured facets applied alongside a free-text query.
///
/// Concepts and files compile into field-qualified MATCH terms; session,
/// importance, and date ranges become plain SQL predicates.
#[derive(Debug, Clone, Default)]
pub struct FtsFilters {
    pub session_id: Option<String>,
    pub types: Vec<ObservationType>,
    pub concepts: Vec<String>,
    pub files: Vec<String>,
    pub importance_min: Option<i64>,
    pub importance_max: Option<i64>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
}

/// One FTS match: the observation, its BM25 rank (lower = better), and a
/// highlighted snippet.
#[derive(Debug, Clone)]
pub struct FtsHit {
    pub observation: Observation,
    pub rank: f64,
    pub snippet: String,
}

/// Strip FTS5 metacharacters from one term.
fn escape_term(term: &str) -> String {
    term.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_')
        .collect()
}

/// Quote a phrase for a field-qualified filter, doubling embedded quotes.
fn quote_phrase(phrase: &str) -> String {
    format!("\"{}\"", phrase.replace('"', "\"\""))
}

/// Build the FTS5 MATCH expression from a free-text query and filters.
///
/// Free text becomes OR-joined terms with a prefix star on the last;
/// concept filters add `concepts:"…"` and file filters add
/// `(files_read:"…" OR files_modified:"…")`, all AND-composed.
pub fn build_match_query(query: &str, filters: &FtsFilters) -> String {
    let mut groups: Vec<String> = Vec::new();

    let terms: Vec<String> = query
        .split_whitespace()
        .map(escape_term)
        .filter(|t| !t.is_empty())
        .collect();
    if !terms.is_empty() {
        let mut parts = Vec::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            if i == terms.len() - 1 {
                parts.push(format!("{term}*"));
            } else {
                parts.push(term.clone());
            }
        }
        groups.push(format!("({})", parts.join(" OR ")));
    }

    for concept in &filters.concepts {
        groups.push(format!("concepts:{}", quote_phrase(concept)));
    }
    for file in &filters.files {
        groups.push(format!(
            "(files_read:{q} OR files_modified:{q})",
            q = quote_phrase(file)
        ));
    }

    groups.join(" AND ")
}

/// Full-text search over current observations.
///
/// Ranking is FTS5's native BM25 (`ORDER BY rank`, lower = better).
pub fn fts_search_sync(
    conn: &Connection,
    query: &str,
    filters: &FtsFilters,
    limit: usize,
) -> rusqlite::Result<Vec<FtsHit>> {
    let match_query = build_match_query(query, filters);
    if match_query.is_empty() {
        return Ok(Vec::new());
    }

    let mut predicates = vec![
        "observations_fts MATCH ?1".to_string(),
        "o.superseded_by IS NULL".to_string(),
        "o.deleted_at IS NULL".to_string(),
    ];
    let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
        vec![Box::new(match_query), Box::new(limit as i64)];
    let mut next_param = 3;

    if let Some(ref session_id) = filters.session_id {
        predicates.push(format!("o.session_id = ?{next_param}"));
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
        predicates.push(format!("o.type IN ({})", placeholders.join(", ")));
    }
    if let Some(min) = filters.importance_min {
        predicates.push(format!("o.importance >= ?{next_param}"));
        values.push(Box::new(min));
        next_param += 1;
    }
    if let Some(max) = filters.importance_max {
        predicates.push(format!("o.importance <= ?{next_param}"));
        values.push(Box::new(max));
        next_param += 1;
    }
    if let Some(ref from) = filters.date_from {
        predicates.push(format!("o.created_at >= ?{next_param}"));
        values.push(Box::new(from.clone()));
        next_param += 1;
    }
    if let Some(ref to) = filters.date_to {
        predicates.push(format!("o.created_at <= ?{next_param}"));
        values.push(Box::new(to.clone()));
        next_param += 1;
    }
    let _ = next_param;

    let columns: String = OBSERVATION_COLUMNS
        .split(", ")
        .map(|c| format!("o.{c}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "SELECT {columns}, observations_fts.rank,
                snippet(observations_fts, 2, '[', ']', '…', 12)
         FROM observations_fts
         JOIN observations o ON o.rowid = observations_fts.rowid
         WHERE {}
         ORDER BY observations_fts.rank
         LIMIT ?2",
        predicates.join(" AND ")
    );

    eprintln!("DEBUG sql = {sql}");
    let mut stmt = conn.prepare(&sql)?;
    let refs: Vec<&dyn rusqlite::types::ToSql> = values.iter().map(|v| v.as_ref()).collect();
    let rows = stmt
        .query_map(refs.as_slice(), |row| {
            Ok(FtsHit {
                observation: parse_observation_row(row)?,
                rank: row.get(19)?,
                snippet: row.get(20)?,
            })
        })?
        .filter_map(|r| {
            if let Err(ref e) = r {
                eprintln!("DEBUG row error: {e}");
            }
            r.ok()
        })
        .collect();
    Ok(rows)
}
