// crates/open-mem-server/src/context/scoring.rs
// Relevance scoring for observation-index entries

use chrono::{DateTime, Utc};
use open_mem_types::{Observation, ObservationType};

/// Weights of the four sub-scores. Deterministic; they sum to 1 so the
/// composite stays in [0, 1].
const W_RECENCY: f64 = 0.4;
const W_TYPE: f64 = 0.3;
const W_AFFINITY: f64 = 0.2;
const W_EFFICIENCY: f64 = 0.1;

/// Inputs the scorer needs beyond the observation itself.
#[derive(Debug, Clone)]
pub struct ScoringContext {
    pub now: DateTime<Utc>,
    pub current_session_id: Option<String>,
}

impl ScoringContext {
    pub fn new(current_session_id: Option<String>) -> Self {
        Self {
            now: Utc::now(),
            current_session_id,
        }
    }
}

/// Banded recency: <24h → 1.0, 24–48h → 0.8, 2–7d → 0.5, older → 0.2.
/// Future timestamps (clock skew) score 1.0.
fn recency_score(created_at: &str, now: DateTime<Utc>) -> f64 {
    let Ok(created) = DateTime::parse_from_rfc3339(created_at) else {
        return 0.2;
    };
    let age_hours = (now - created.with_timezone(&Utc)).num_minutes() as f64 / 60.0;
    if age_hours < 0.0 {
        1.0
    } else if age_hours < 24.0 {
        1.0
    } else if age_hours < 48.0 {
        0.8
    } else if age_hours < 24.0 * 7.0 {
        0.5
    } else {
        0.2
    }
}

/// Fixed per-type importance.
fn type_score(kind: ObservationType) -> f64 {
    match kind {
        ObservationType::Decision => 1.0,
        ObservationType::Bugfix => 0.9,
        ObservationType::Feature => 0.7,
        ObservationType::Refactor => 0.6,
        ObservationType::Discovery => 0.5,
        ObservationType::Change => 0.4,
    }
}

/// Same session 1.0, different 0.3, no current session 0.5.
fn affinity_score(session_id: &str, current: Option<&str>) -> f64 {
    match current {
        Some(current) if current == session_id => 1.0,
        Some(_) => 0.3,
        None => 0.5,
    }
}

/// Linear token efficiency: 1.0 at ≤10 tokens down to 0.2 at ≥200.
fn efficiency_score(token_count: i64) -> f64 {
    if token_count <= 10 {
        1.0
    } else if token_count >= 200 {
        0.2
    } else {
        1.0 - 0.8 * ((token_count - 10) as f64 / 190.0)
    }
}

/// Composite relevance in [0, 1].
pub fn relevance_score(obs: &Observation, ctx: &ScoringContext) -> f64 {
    W_RECENCY * recency_score(&obs.created_at, ctx.now)
        + W_TYPE * type_score(obs.kind)
        + W_AFFINITY * affinity_score(&obs.session_id, ctx.current_session_id.as_deref())
        + W_EFFICIENCY * efficiency_score(obs.token_count)
}

/// Sort observations by relevance descending without mutating the input.
/// Score ties break toward the more recent `created_at`.
pub fn sort_by_relevance(observations: &[Observation], ctx: &ScoringContext) -> Vec<Observation> {
    let mut scored: Vec<(f64, &Observation)> = observations
        .iter()
        .map(|obs| (relevance_score(obs, ctx), obs))
        .collect();
    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.1.created_at.cmp(&a.1.created_at))
    });
    scored.into_iter().map(|(_, obs)| obs.clone()).collect()
}
