// crates/open-mem-server/src/search/mod.rs
// Hybrid retrieval: strategy routing, RRF fusion, graph augmentation,
// optional reranking, cross-scope merge

mod filter;
mod graph;
mod rerank;
mod rrf;

pub use filter::filter_only_search_sync;
pub use graph::{graph_augment_sync, noun_phrase_candidates};
pub use rerank::rerank;
pub use rrf::rrf_merge;

use std::collections::HashMap;
use std::sync::Arc;

use open_mem_types::{Observation, UserObservation};

use crate::config::Settings;
use crate::db::pool::DatabasePool;
use crate::db::{FtsFilters, FtsHit};
use crate::embeddings::EmbeddingModel;
use crate::llm::LanguageModel;
use crate::utils::CancelToken;

/// Which database(s) a search covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Scope {
    #[default]
    Project,
    User,
    All,
}

impl Scope {
    pub fn from_str_lossy(s: &str) -> Self {
        match s {
            "user" => Self::User,
            "all" => Self::All,
            _ => Self::Project,
        }
    }
}

/// One retrieval request.
#[derive(Debug, Clone, Default)]
pub struct SearchRequest {
    pub query: String,
    pub filters: FtsFilters,
    pub limit: usize,
    pub scope: Scope,
    /// Force the vector-only strategy even when FTS is available.
    pub prefer_semantic: bool,
}

/// One search result with its provenance.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub observation: Observation,
    pub rank: f64,
    pub matched_by: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
    /// "project" or "user".
    pub source: String,
}

/// Strategy chosen by the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    FilterOnly,
    Keyword,
    Semantic,
    Hybrid,
}

/// The retrieval engine for one project (plus the optional user scope).
pub struct SearchEngine {
    pool: Arc<DatabasePool>,
    user_pool: Option<Arc<DatabasePool>>,
    language_model: Option<Arc<dyn LanguageModel>>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
    settings: Settings,
}

impl SearchEngine {
    pub fn new(
        pool: Arc<DatabasePool>,
        user_pool: Option<Arc<DatabasePool>>,
        language_model: Option<Arc<dyn LanguageModel>>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
        settings: Settings,
    ) -> Self {
        Self {
            pool,
            user_pool,
            language_model,
            embedding_model,
            settings,
        }
    }

    /// Pick a strategy from the request shape.
    pub fn route(&self, request: &SearchRequest) -> Strategy {
        if request.query.trim().is_empty() {
            return Strategy::FilterOnly;
        }
        if request.prefer_semantic && self.embedding_model.is_some() {
            return Strategy::Semantic;
        }
        if self.embedding_model.is_some() {
            return Strategy::Hybrid;
        }
        Strategy::Keyword
    }

    /// Run a search, degrading through simpler strategies on error
    /// (hybrid → keyword → filter-only). Never fails outright.
    pub async fn search(&self, request: &SearchRequest, cancel: &CancelToken) -> Vec<SearchHit> {
        let limit = request.limit.max(1);

        let mut hits = if request.scope == Scope::User {
            Vec::new()
        } else {
            match self.route(request) {
                Strategy::FilterOnly => self.filter_only(request, limit).await,
                Strategy::Keyword => self.keyword(request, limit).await,
                Strategy::Semantic => match self.semantic(request, limit, cancel).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!("semantic search failed, falling back to keyword: {e}");
                        self.keyword(request, limit).await
                    }
                },
                Strategy::Hybrid => match self.hybrid(request, limit, cancel).await {
                    Ok(hits) => hits,
                    Err(e) => {
                        tracing::warn!("hybrid search failed, falling back to keyword: {e}");
                        self.keyword(request, limit).await
                    }
                },
            }
        };

        // Cross-scope: user results always append after project results
        if matches!(request.scope, Scope::User | Scope::All)
            && self.settings.user_memory_enabled
            && let Some(ref user_pool) = self.user_pool
        {
            hits.extend(self.user_scope(user_pool, request, limit).await);
        }

        hits
    }

    async fn filter_only(&self, request: &SearchRequest, limit: usize) -> Vec<SearchHit> {
        let filters = request.filters.clone();
        self.pool
            .try_interact("filter-only search", move |conn| {
                filter_only_search_sync(conn, &filters, limit).map_err(Into::into)
            })
            .await
            .unwrap_or_default()
            .into_iter()
            .map(|observation| SearchHit {
                observation,
                rank: 0.0,
                matched_by: vec!["filter".to_string()],
                snippet: None,
                source: "project".to_string(),
            })
            .collect()
    }

    async fn keyword(&self, request: &SearchRequest, limit: usize) -> Vec<SearchHit> {
        let query = request.query.clone();
        let filters = request.filters.clone();
        self.pool
            .try_interact("keyword search", move |conn| {
                crate::db::fts_search_sync(conn, &query, &filters, limit).map_err(Into::into)
            })
            .await
            .unwrap_or_default()
            .into_iter()
            .map(fts_hit_to_search_hit)
            .collect()
    }

    async fn semantic(
        &self,
        request: &SearchRequest,
        limit: usize,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<SearchHit>> {
        let ids = self.vector_ids(&request.query, limit, cancel).await?;
        let observations = self.fetch_observations(&ids).await;
        Ok(observations
            .into_iter()
            .enumerate()
            .map(|(i, observation)| SearchHit {
                observation,
                rank: (i + 1) as f64,
                matched_by: vec!["vector".to_string()],
                snippet: None,
                source: "project".to_string(),
            })
            .collect())
    }

    async fn hybrid(
        &self,
        request: &SearchRequest,
        limit: usize,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<SearchHit>> {
        // Keyword leg
        let query = request.query.clone();
        let filters = request.filters.clone();
        let keyword_hits: Vec<FtsHit> = self
            .pool
            .interact_raw(move |conn| crate::db::fts_search_sync(conn, &query, &filters, limit))
            .await?;
        let keyword_ids: Vec<String> = keyword_hits
            .iter()
            .map(|h| h.observation.id.clone())
            .collect();
        let mut snippets: HashMap<String, String> = keyword_hits
            .into_iter()
            .map(|h| (h.observation.id.clone(), h.snippet))
            .collect();

        // Vector leg; a failed embed degrades to keyword-only fusion
        let vector_ids = match self.vector_ids(&request.query, limit, cancel).await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::debug!("vector leg unavailable: {e}");
                Vec::new()
            }
        };

        let mut fused = rrf_merge(&keyword_ids, &vector_ids, limit);

        // Graph augmentation appends new reachable observations at rank 0
        let mut graph_ids: Vec<String> = Vec::new();
        if self.settings.entity_extraction_enabled && fused.len() < limit {
            let query = request.query.clone();
            let reachable = self
                .pool
                .try_interact("graph augmentation", move |conn| {
                    Ok(graph_augment_sync(conn, &query, limit))
                })
                .await
                .unwrap_or_default();
            for id in reachable {
                if fused.len() >= limit {
                    break;
                }
                if !fused.contains(&id) {
                    fused.push(id.clone());
                    graph_ids.push(id);
                }
            }
        }

        let observations = self.fetch_observations(&fused).await;
        let mut hits: Vec<SearchHit> = observations
            .into_iter()
            .enumerate()
            .map(|(i, observation)| {
                let id = observation.id.clone();
                let mut matched_by = Vec::new();
                if keyword_ids.contains(&id) {
                    matched_by.push("keyword".to_string());
                }
                if vector_ids.contains(&id) {
                    matched_by.push("vector".to_string());
                }
                let rank = if graph_ids.contains(&id) {
                    matched_by.push("graph".to_string());
                    0.0
                } else {
                    (i + 1) as f64
                };
                SearchHit {
                    observation,
                    rank,
                    matched_by,
                    snippet: snippets.remove(&id),
                    source: "project".to_string(),
                }
            })
            .collect();

        // Optional rerank of the fused head
        if self.settings.reranking_enabled {
            hits = self.apply_rerank(&request.query, hits, cancel).await;
        }

        Ok(hits)
    }

    async fn apply_rerank(
        &self,
        query: &str,
        hits: Vec<SearchHit>,
        cancel: &CancelToken,
    ) -> Vec<SearchHit> {
        let mut by_id: HashMap<String, SearchHit> = hits
            .iter()
            .map(|h| (h.observation.id.clone(), h.clone()))
            .collect();
        let observations: Vec<Observation> =
            hits.into_iter().map(|h| h.observation).collect();
        let reordered = rerank(
            self.language_model.as_ref(),
            query,
            observations,
            self.settings.reranking_max_candidates,
            cancel,
        )
        .await;
        reordered
            .into_iter()
            .filter_map(|obs| by_id.remove(&obs.id))
            .collect()
    }

    /// Vector candidate ids for a query: embed, then native scan when the
    /// index exists, in-memory cosine fallback otherwise.
    async fn vector_ids(
        &self,
        query: &str,
        limit: usize,
        cancel: &CancelToken,
    ) -> anyhow::Result<Vec<String>> {
        let Some(ref embedder) = self.embedding_model else {
            return Ok(Vec::new());
        };
        let query_embedding = embedder.embed(query, cancel).await?;
        let native = self.pool.has_vector_index();
        let scored: Vec<(String, f64)> = self
            .pool
            .interact_raw(move |conn| {
                if native {
                    crate::db::vector_search_native_sync(conn, &query_embedding, limit, None)
                } else {
                    crate::db::vector_search_fallback_sync(conn, &query_embedding, limit)
                }
            })
            .await?;
        Ok(scored.into_iter().map(|(id, _)| id).collect())
    }

    async fn fetch_observations(&self, ids: &[String]) -> Vec<Observation> {
        if ids.is_empty() {
            return Vec::new();
        }
        let ids = ids.to_vec();
        self.pool
            .try_interact("fetch by ids", move |conn| {
                Ok(crate::db::get_observations_by_ids_sync(conn, &ids))
            })
            .await
            .unwrap_or_default()
    }

    async fn user_scope(
        &self,
        user_pool: &Arc<DatabasePool>,
        request: &SearchRequest,
        limit: usize,
    ) -> Vec<SearchHit> {
        let query = request.query.clone();
        let filters = request.filters.clone();
        let rows = user_pool
            .try_interact("user-scope search", move |conn| {
                if query.trim().is_empty() {
                    Ok(crate::db::list_recent_user_observations_sync(conn, limit)?
                        .into_iter()
                        .map(|obs| (obs, 0.0))
                        .collect())
                } else {
                    crate::db::user_fts_search_sync(conn, &query, &filters, limit)
                        .map_err(Into::into)
                }
            })
            .await
            .unwrap_or_default();

        rows.into_iter()
            .map(|(obs, rank)| SearchHit {
                observation: user_observation_as_observation(obs),
                rank,
                matched_by: vec!["keyword".to_string()],
                snippet: None,
                source: "user".to_string(),
            })
            .collect()
    }
}

fn fts_hit_to_search_hit(hit: FtsHit) -> SearchHit {
    SearchHit {
        observation: hit.observation,
        rank: hit.rank,
        matched_by: vec!["keyword".to_string()],
        snippet: Some(hit.snippet),
        source: "project".to_string(),
    }
}

/// Present a user-scope row through the common observation shape.
/// The session link stays empty; the originating project surfaces in the
/// subtitle when the row has none of its own.
fn user_observation_as_observation(user: UserObservation) -> Observation {
    Observation {
        id: user.id,
        session_id: String::new(),
        kind: user.kind,
        title: user.title,
        subtitle: if user.subtitle.is_empty() {
            format!("from {}", user.source_project)
        } else {
            user.subtitle
        },
        facts: user.facts,
        narrative: user.narrative,
        concepts: user.concepts,
        files_read: user.files_read,
        files_modified: user.files_modified,
        raw_tool_output: String::new(),
        tool_name: String::new(),
        created_at: user.created_at,
        token_count: user.token_count,
        discovery_tokens: 0,
        importance: user.importance,
        superseded_by: None,
        superseded_at: None,
        deleted_at: user.deleted_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::test_support::setup_test_pool;

    fn settings() -> Settings {
        Settings::defaults(std::path::Path::new("/proj"))
    }

    fn engine(pool: Arc<DatabasePool>) -> SearchEngine {
        SearchEngine::new(pool, None, None, None, settings())
    }

    #[tokio::test]
    async fn router_picks_filter_only_for_empty_query() {
        let engine = engine(setup_test_pool().await);
        let request = SearchRequest {
            query: "   ".into(),
            limit: 5,
            ..Default::default()
        };
        assert_eq!(engine.route(&request), Strategy::FilterOnly);
    }

    #[tokio::test]
    async fn router_picks_keyword_without_embeddings() {
        let engine = engine(setup_test_pool().await);
        let request = SearchRequest {
            query: "pool sizing".into(),
            limit: 5,
            ..Default::default()
        };
        assert_eq!(engine.route(&request), Strategy::Keyword);
    }

    #[tokio::test]
    async fn keyword_search_end_to_end() {
        let pool = setup_test_pool().await;
        pool.interact_raw(|conn| {
            crate::db::test_support::seed_session(conn, "s1", "/proj");
            let mut obs =
                crate::db::test_support::sample_observation("o1", "s1", "Retry backoff tuning");
            obs.narrative = "Raised the backoff ceiling".into();
            crate::db::create_observation_sync(conn, &obs)
        })
        .await
        .unwrap();

        let engine = engine(pool);
        let request = SearchRequest {
            query: "backoff".into(),
            limit: 5,
            ..Default::default()
        };
        let hits = engine.search(&request, &CancelToken::new()).await;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].observation.id, "o1");
        assert_eq!(hits[0].source, "project");
        assert_eq!(hits[0].matched_by, vec!["keyword".to_string()]);
    }

    #[tokio::test]
    async fn search_never_errors_on_garbage() {
        let engine = engine(setup_test_pool().await);
        let request = SearchRequest {
            query: "((**))".into(),
            limit: 5,
            ..Default::default()
        };
        let hits = engine.search(&request, &CancelToken::new()).await;
        assert!(hits.is_empty());
    }
}
