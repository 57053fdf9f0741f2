// crates/open-mem-server/src/search/graph.rs
// Graph augmentation: entity lookup from query noun phrases, depth-1
// relation traversal, and mentioned-observation collection

use rusqlite::Connection;

use crate::db::{
    entity_ids_by_names_sync, neighbor_entities_sync, observations_mentioning_entities_sync,
};

/// Candidate noun phrases from a query: every two-word window first, then
/// single words, all length ≥ 2. Entity lookup is case-insensitive so the
/// phrases keep their original casing.
pub fn noun_phrase_candidates(query: &str) -> Vec<String> {
    let words: Vec<&str> = query
        .split_whitespace()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric() && c != '_' && c != '/' && c != '.'))
        .filter(|w| !w.is_empty())
        .collect();

    let mut candidates = Vec::new();
    for pair in words.windows(2) {
        let phrase = format!("{} {}", pair[0], pair[1]);
        if phrase.len() >= 2 {
            candidates.push(phrase);
        }
    }
    for word in &words {
        if word.len() >= 2 {
            candidates.push((*word).to_string());
        }
    }
    candidates.dedup();
    candidates
}

/// Observations reachable from the query through the entity graph.
///
/// Looks up entities matching the query's noun phrases, walks relations to
/// depth 1 (iterative, visited-set deduped), and returns ids of current
/// observations mentioning any reached entity, newest first, bounded by
/// `limit`.
pub fn graph_augment_sync(conn: &Connection, query: &str, limit: usize) -> Vec<String> {
    let candidates = noun_phrase_candidates(query);
    if candidates.is_empty() {
        return Vec::new();
    }

    let seeds = entity_ids_by_names_sync(conn, &candidates);
    if seeds.is_empty() {
        return Vec::new();
    }

    // Depth-1 BFS with a visited set; no back-pointers, id-indexed only
    let mut visited: std::collections::HashSet<String> = seeds.iter().cloned().collect();
    let mut frontier = seeds.clone();
    for neighbor in neighbor_entities_sync(conn, &seeds) {
        if visited.insert(neighbor.clone()) {
            frontier.push(neighbor);
        }
    }

    observations_mentioning_entities_sync(conn, &frontier, limit)
}
