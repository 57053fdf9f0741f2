// crates/open-mem-server/src/context/builder.rs
// Progressive-disclosure assembly under a token budget

use open_mem_types::{Observation, SessionSummary};

use super::scoring::{ScoringContext, sort_by_relevance};

/// The assembled memory context: summaries first, then the lightweight
/// observation index, then a few full observations. `total_tokens` never
/// exceeds the budget it was built under.
#[derive(Debug, Clone, Default)]
pub struct ProgressiveContext {
    pub recent_summaries: Vec<SessionSummary>,
    pub observation_index: Vec<Observation>,
    pub full_observations: Vec<Observation>,
    pub total_tokens: i64,
}

impl ProgressiveContext {
    pub fn is_empty(&self) -> bool {
        self.recent_summaries.is_empty()
            && self.observation_index.is_empty()
            && self.full_observations.is_empty()
    }
}

/// Assemble a progressive context.
///
/// Order is fixed: summaries (newest first) while they fit, then index
/// entries (relevance order when a scoring context is supplied, else
/// newest first) until the next would overflow, then full observations
/// not already in the index until the budget is exhausted. `max_index`
/// and `max_full` bound entry counts independently of tokens.
pub fn build_progressive_context(
    summaries: &[SessionSummary],
    observations: &[Observation],
    scoring: Option<&ScoringContext>,
    budget: i64,
    max_index: usize,
    max_full: usize,
) -> ProgressiveContext {
    let mut context = ProgressiveContext::default();
    if budget <= 0 {
        return context;
    }

    // Phase 1: summaries, newest first
    for summary in summaries {
        if context.total_tokens + summary.token_count > budget {
            break;
        }
        context.total_tokens += summary.token_count;
        context.recent_summaries.push(summary.clone());
    }

    // Phase 2: observation index
    let ordered: Vec<Observation> = match scoring {
        Some(ctx) => sort_by_relevance(observations, ctx),
        None => {
            let mut chronological = observations.to_vec();
            chronological.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            chronological
        }
    };
    for obs in &ordered {
        if context.observation_index.len() >= max_index {
            break;
        }
        if context.total_tokens + obs.token_count > budget {
            break;
        }
        context.total_tokens += obs.token_count;
        context.observation_index.push(obs.clone());
    }

    // Phase 3: full observations not already indexed
    let indexed: std::collections::HashSet<&str> = context
        .observation_index
        .iter()
        .map(|o| o.id.as_str())
        .collect();
    for obs in &ordered {
        if context.full_observations.len() >= max_full {
            break;
        }
        if indexed.contains(obs.id.as_str()) {
            continue;
        }
        if context.total_tokens + obs.token_count > budget {
            break;
        }
        context.total_tokens += obs.token_count;
        context.full_observations.push(obs.clone());
    }

    context
}
