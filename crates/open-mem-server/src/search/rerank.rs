// crates/open-mem-server/src/search/rerank.rs
// Result reranking: LLM permutation with graceful degradation, heuristic
// overlap scorer when no model is configured

use std::sync::Arc;

use open_mem_types::Observation;

use crate::llm::{LanguageModel, RerankCandidate};
use crate::utils::CancelToken;

/// Heuristic weights: title overlap, narrative overlap, concept overlap,
/// recency, importance.
const W_TITLE: f64 = 0.4;
const W_NARRATIVE: f64 = 0.3;
const W_CONCEPTS: f64 = 0.15;
const W_RECENCY: f64 = 0.1;
const W_IMPORTANCE: f64 = 0.05;

/// Rerank the top `max_candidates` of a fused list.
///
/// With a language model, asks for a permutation of candidate indices and
/// applies it; unmentioned candidates follow in their original order. A
/// failed call or malformed permutation keeps the original order. Without
/// a model the heuristic scorer reorders instead.
pub async fn rerank(
    model: Option<&Arc<dyn LanguageModel>>,
    query: &str,
    observations: Vec<Observation>,
    max_candidates: usize,
    cancel: &CancelToken,
) -> Vec<Observation> {
    if observations.len() < 2 {
        return observations;
    }

    let head_len = observations.len().min(max_candidates);
    let (head, tail) = observations.split_at(head_len);

    let reordered_head = match model {
        Some(model) => {
            let candidates: Vec<RerankCandidate> = head
                .iter()
                .map(|obs| RerankCandidate {
                    id: obs.id.clone(),
                    text: format!("{}: {}", obs.title, obs.narrative),
                })
                .collect();
            match model.rerank(query, &candidates, cancel).await {
                Ok(order) => apply_permutation(head.to_vec(), &order),
                Err(e) => {
                    tracing::debug!("rerank call failed, keeping original order: {e}");
                    head.to_vec()
                }
            }
        }
        None => heuristic_rerank(query, head.to_vec()),
    };

    let mut result = reordered_head;
    result.extend_from_slice(tail);
    result
}

/// Apply a model-returned index permutation. Invalid indices and
/// duplicates are dropped; candidates the model never mentioned append in
/// original order. A permutation that references nothing valid leaves the
/// input untouched.
fn apply_permutation(head: Vec<Observation>, order: &[usize]) -> Vec<Observation> {
    let mut used = vec![false; head.len()];
    let mut reordered = Vec::with_capacity(head.len());
    for &index in order {
        if index < head.len() && !used[index] {
            used[index] = true;
            reordered.push(head[index].clone());
        }
    }
    if reordered.is_empty() {
        return head;
    }
    for (index, taken) in used.iter().enumerate() {
        if !taken {
            reordered.push(head[index].clone());
        }
    }
    reordered
}

/// Heuristic relevance: token overlap against title/narrative/concepts
/// plus recency and importance bonuses.
fn heuristic_rerank(query: &str, mut head: Vec<Observation>) -> Vec<Observation> {
    let query_tokens = tokenize(query);
    if query_tokens.is_empty() {
        return head;
    }
    let now = chrono::Utc::now();

    let mut scored: Vec<(f64, usize)> = head
        .iter()
        .enumerate()
        .map(|(i, obs)| (heuristic_score(&query_tokens, obs, now), i))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.1.cmp(&b.1))
    });

    let order: Vec<usize> = scored.into_iter().map(|(_, i)| i).collect();
    let mut reordered = Vec::with_capacity(head.len());
    for index in order {
        reordered.push(head[index].clone());
    }
    head.clear();
    reordered
}

fn heuristic_score(
    query_tokens: &[String],
    obs: &Observation,
    now: chrono::DateTime<chrono::Utc>,
) -> f64 {
    let title_overlap = overlap(query_tokens, &tokenize(&obs.title));
    let narrative_overlap = overlap(query_tokens, &tokenize(&obs.narrative));
    let concept_overlap = overlap(query_tokens, &tokenize(&obs.concepts.join(" ")));

    let recency = chrono::DateTime::parse_from_rfc3339(&obs.created_at)
        .map(|created| {
            let days = (now - created.with_timezone(&chrono::Utc)).num_hours() as f64 / 24.0;
            if days <= 1.0 {
                1.0
            } else if days <= 7.0 {
                0.6
            } else {
                0.2
            }
        })
        .unwrap_or(0.2);

    let importance = (obs.importance.clamp(1, 5) as f64) / 5.0;

    W_TITLE * title_overlap
        + W_NARRATIVE * narrative_overlap
        + W_CONCEPTS * concept_overlap
        + W_RECENCY * recency
        + W_IMPORTANCE * importance
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= 2)
        .map(String::from)
        .collect()
}

/// Fraction of query tokens present in the field.
fn overlap(query_tokens: &[String], field_tokens: &[String]) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let field: std::collections::HashSet<&String> = field_tokens.iter().collect();
    let hits = query_tokens.iter().filter(|t| field.contains(t)).count();
    hits as f64 / query_tokens.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use open_mem_types::ObservationType;

    fn obs(id: &str, title: &str, narrative: &str) -> Observation {
        Observation {
            id: id.into(),
            session_id: "s1".into(),
            kind: ObservationType::Discovery,
            title: title.into(),
            subtitle: String::new(),
            facts: vec![],
            narrative: narrative.into(),
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            raw_tool_output: String::new(),
            tool_name: "Read".into(),
            created_at: "2026-01-01T00:00:00Z".into(),
            token_count: 10,
            discovery_tokens: 100,
            importance: 3,
            superseded_by: None,
            superseded_at: None,
            deleted_at: None,
        }
    }

    #[test]
    fn permutation_applies_and_appends_unmentioned() {
        let head = vec![obs("a", "", ""), obs("b", "", ""), obs("c", "", "")];
        let out = apply_permutation(head, &[2, 0]);
        let ids: Vec<&str> = out.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn garbage_permutation_keeps_original_order() {
        let head = vec![obs("a", "", ""), obs("b", "", "")];
        let out = apply_permutation(head, &[9, 42]);
        let ids: Vec<&str> = out.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn duplicate_indices_counted_once() {
        let head = vec![obs("a", "", ""), obs("b", "", "")];
        let out = apply_permutation(head, &[1, 1, 0]);
        let ids: Vec<&str> = out.iter().map(|o| o.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn heuristic_prefers_title_match() {
        let head = vec![
            obs("noise", "Unrelated refactor", "nothing to see"),
            obs("hit", "Connection pool sizing", "the pool grows"),
        ];
        let out = heuristic_rerank("connection pool", head);
        assert_eq!(out[0].id, "hit");
    }

    #[tokio::test]
    async fn single_candidate_short_circuits() {
        let out = rerank(
            None,
            "anything",
            vec![obs("only", "t", "n")],
            10,
            &CancelToken::new(),
        )
        .await;
        assert_eq!(out.len(), 1);
    }
}
