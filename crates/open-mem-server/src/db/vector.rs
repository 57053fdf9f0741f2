// crates/open-mem-server/src/db/vector.rs
// Vector similarity over observation embeddings: native vec0 range scan
// with an in-memory cosine fallback when the extension is unavailable

use rusqlite::Connection;

use super::log_and_discard;
use crate::embeddings::cosine_similarity;

/// Minimum cosine similarity kept by the fallback scan.
const FALLBACK_MIN_SIMILARITY: f32 = 0.3;

/// Recency window multiplier for the fallback scan. The fallback only
/// examines the `limit * 10` most recent embedded observations; this is a
/// heuristic, not a guarantee, and large datasets may miss relevant
/// far-back observations. Do not widen silently.
const FALLBACK_SCAN_FACTOR: usize = 10;

/// Serialize an embedding as little-endian f32 bytes (the vec0 blob form).
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding blob back to f32 values.
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Native vector search: one range scan over the vec0 index returning
/// `(observation_id, distance)` sorted ascending. An optional candidate
/// subset pre-filters the scan.
pub fn vector_search_native_sync(
    conn: &Connection,
    query_embedding: &[f32],
    limit: usize,
    candidate_ids: Option<&[String]>,
) -> rusqlite::Result<Vec<(String, f64)>> {
    let bytes = embedding_to_bytes(query_embedding);

    let rows: Vec<(String, f64)> = match candidate_ids {
        None => {
            let mut stmt = conn.prepare(
                "SELECT observation_id, vec_distance_cosine(embedding, ?1) AS distance
                 FROM vec_observations
                 ORDER BY distance
                 LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(rusqlite::params![bytes, limit as i64], |row| {
                    Ok((row.get(0)?, row.get(1)?))
                })?
                .filter_map(log_and_discard)
                .collect();
            rows
        }
        Some(ids) => {
            let capped: Vec<&String> = ids.iter().take(100).collect();
            if capped.is_empty() {
                return Ok(Vec::new());
            }
            let placeholders: Vec<String> =
                (0..capped.len()).map(|i| format!("?{}", i + 3)).collect();
            let sql = format!(
                "SELECT observation_id, vec_distance_cosine(embedding, ?1) AS distance
                 FROM vec_observations
                 WHERE observation_id IN ({})
                 ORDER BY distance
                 LIMIT ?2",
                placeholders.join(", ")
            );
            let mut stmt = conn.prepare(&sql)?;
            let mut values: Vec<Box<dyn rusqlite::types::ToSql>> =
                vec![Box::new(bytes), Box::new(limit as i64)];
            for id in &capped {
                values.push(Box::new((*id).clone()));
            }
            let refs: Vec<&dyn rusqlite::types::ToSql> =
                values.iter().map(|v| v.as_ref()).collect();
            let rows = stmt
                .query_map(refs.as_slice(), |row| Ok((row.get(0)?, row.get(1)?)))?
                .filter_map(log_and_discard)
                .collect();
            rows
        }
    };

    Ok(rows)
}

/// Fallback vector search without the vec0 extension.
///
/// Scans the `limit * 10` most recent current observations that carry an
/// embedding, computes cosine similarity in memory, drops everything
/// below 0.3, and returns the top `limit` as `(id, distance)` where
/// `distance = 1 - similarity` (matching the native scan's ordering).
pub fn vector_search_fallback_sync(
    conn: &Connection,
    query_embedding: &[f32],
    limit: usize,
) -> rusqlite::Result<Vec<(String, f64)>> {
    let scan_window = limit.saturating_mul(FALLBACK_SCAN_FACTOR).max(1);
    let mut stmt = conn.prepare(
        "SELECT id, embedding FROM observations
         WHERE embedding IS NOT NULL AND superseded_by IS NULL AND deleted_at IS NULL
         ORDER BY created_at DESC
         LIMIT ?1",
    )?;
    let candidates: Vec<(String, Vec<u8>)> = stmt
        .query_map([scan_window as i64], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?
        .filter_map(log_and_discard)
        .collect();

    let mut scored: Vec<(String, f64)> = candidates
        .into_iter()
        .filter_map(|(id, blob)| {
            let embedding = bytes_to_embedding(&blob);
            let similarity = cosine_similarity(query_embedding, &embedding);
            if similarity < FALLBACK_MIN_SIMILARITY {
                None
            } else {
                Some((id, 1.0 - similarity as f64))
            }
        })
        .collect();

    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(limit);
    Ok(scored)
}
