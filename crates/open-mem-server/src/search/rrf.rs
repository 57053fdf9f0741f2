// crates/open-mem-server/src/search/rrf.rs
// Reciprocal-rank fusion of keyword and vector result lists

/// RRF constant; scores accumulate as `1 / (k + rank)` with 1-based ranks.
const RRF_K: f64 = 60.0;

/// Fuse two ranked id lists by reciprocal-rank score.
///
/// Every id present in either list accumulates `1/(60 + rank)` per list it
/// appears in; the fused order is by accumulated score descending,
/// truncated to `limit`. Ties break toward the better position in the
/// first (keyword) list. When one list is empty the other passes through
/// unchanged.
pub fn rrf_merge(keyword: &[String], vector: &[String], limit: usize) -> Vec<String> {
    if keyword.is_empty() {
        return vector.iter().take(limit).cloned().collect();
    }
    if vector.is_empty() {
        return keyword.iter().take(limit).cloned().collect();
    }

    use std::collections::HashMap;
    let mut scores: HashMap<&String, f64> = HashMap::new();
    let mut keyword_rank: HashMap<&String, usize> = HashMap::new();

    for (i, id) in keyword.iter().enumerate() {
        *scores.entry(id).or_default() += 1.0 / (RRF_K + (i + 1) as f64);
        keyword_rank.entry(id).or_insert(i);
    }
    for (i, id) in vector.iter().enumerate() {
        *scores.entry(id).or_default() += 1.0 / (RRF_K + (i + 1) as f64);
    }

    let mut fused: Vec<(&String, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                let ra = keyword_rank.get(a.0).copied().unwrap_or(usize::MAX);
                let rb = keyword_rank.get(b.0).copied().unwrap_or(usize::MAX);
                ra.cmp(&rb)
            })
    });

    fused.into_iter().take(limit).map(|(id, _)| id.clone()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn empty_list_passes_other_through() {
        assert_eq!(rrf_merge(&[], &ids(&["a", "b"]), 10), ids(&["a", "b"]));
        assert_eq!(rrf_merge(&ids(&["x"]), &[], 10), ids(&["x"]));
        assert!(rrf_merge(&[], &[], 10).is_empty());
    }

    #[test]
    fn overlapping_id_outranks_single_list_hits() {
        // "b" appears in both lists and must come out first
        let fused = rrf_merge(&ids(&["a", "b"]), &ids(&["b", "c"]), 10);
        assert_eq!(fused[0], "b");
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn ties_break_toward_keyword_order() {
        // Symmetric positions produce equal scores; keyword rank decides
        let fused = rrf_merge(&ids(&["a", "b"]), &ids(&["b", "a"]), 10);
        assert_eq!(fused, ids(&["a", "b"]));
    }

    #[test]
    fn output_is_subset_and_bounded() {
        let keyword = ids(&["a", "b", "c"]);
        let vector = ids(&["d", "e", "f"]);
        let fused = rrf_merge(&keyword, &vector, 4);
        assert_eq!(fused.len(), 4);
        for id in &fused {
            assert!(keyword.contains(id) || vector.contains(id));
        }
    }

    #[test]
    fn top_of_each_list_beats_tail_of_other() {
        let fused = rrf_merge(&ids(&["k1", "k2", "k3"]), &ids(&["v1", "v2", "v3"]), 10);
        // First elements of both lists tie on score; keyword wins the tie
        assert_eq!(fused[0], "k1");
        assert_eq!(fused[1], "v1");
    }
}
