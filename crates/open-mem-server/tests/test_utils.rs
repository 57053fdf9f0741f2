//! Test utilities for open-mem integration tests

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;

use open_mem::config::{Mode, Settings};
use open_mem::db::pool::DatabasePool;
use open_mem::embeddings::EmbeddingModel;
use open_mem::engine::{Engine, compile_patterns};
use open_mem::llm::{
    CompressedObservation, LanguageModel, ModeHints, Provider, RerankCandidate, SummaryFields,
};
use open_mem::processor::Processor;
use open_mem::utils::CancelToken;
use open_mem_types::ObservationType;

/// Deterministic stand-in for a provider: compresses every output into a
/// fixed-shape observation, counts calls, and can be switched to fail.
pub struct StubModel {
    pub title: String,
    pub kind: ObservationType,
    pub fail: bool,
    pub calls: AtomicUsize,
}

impl StubModel {
    pub fn returning(kind: ObservationType, title: &str) -> Arc<Self> {
        Arc::new(Self {
            title: title.to_string(),
            kind,
            fail: false,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            title: String::new(),
            kind: ObservationType::Discovery,
            fail: true,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LanguageModel for StubModel {
    async fn compress(
        &self,
        _tool_name: &str,
        _output: &str,
        _hints: &ModeHints,
        _cancel: &CancelToken,
    ) -> Result<CompressedObservation> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            anyhow::bail!("stub compression failure");
        }
        Ok(CompressedObservation {
            kind: self.kind,
            title: self.title.clone(),
            subtitle: String::new(),
            facts: vec![],
            narrative: "N".to_string(),
            concepts: vec![],
            files_read: vec![],
            files_modified: vec![],
            importance: 3,
        })
    }

    async fn summarize(
        &self,
        observations: &[String],
        _cancel: &CancelToken,
    ) -> Result<SummaryFields> {
        if self.fail {
            anyhow::bail!("stub summarization failure");
        }
        Ok(SummaryFields {
            summary: format!("summarized {} observations", observations.len()),
            ..Default::default()
        })
    }

    async fn rerank(
        &self,
        _query: &str,
        candidates: &[RerankCandidate],
        _cancel: &CancelToken,
    ) -> Result<Vec<usize>> {
        Ok((0..candidates.len()).collect())
    }

    fn provider_type(&self) -> Provider {
        Provider::Google
    }

    fn model_name(&self) -> String {
        "stub-model".to_string()
    }
}

/// Keyword-keyed embeddings: any text containing the marker maps near the
/// query axis, everything else lands orthogonal to it.
pub struct MarkerEmbeddings {
    pub marker: String,
}

impl MarkerEmbeddings {
    pub fn new(marker: &str) -> Arc<Self> {
        Arc::new(Self {
            marker: marker.to_string(),
        })
    }
}

#[async_trait]
impl EmbeddingModel for MarkerEmbeddings {
    async fn embed(&self, text: &str, _cancel: &CancelToken) -> Result<Vec<f32>> {
        if text.contains(&self.marker) {
            Ok(vec![1.0, 0.0])
        } else {
            Ok(vec![0.0, 1.0])
        }
    }

    async fn embed_batch(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text, cancel).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        2
    }

    fn model_name(&self) -> String {
        "marker-embeddings".to_string()
    }
}

/// Build an engine over a shared in-memory pool with injectable models.
pub async fn test_engine(
    settings: Settings,
    language_model: Option<Arc<dyn LanguageModel>>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
) -> Arc<Engine> {
    let pool = Arc::new(DatabasePool::open_in_memory(0).await.expect("pool"));
    engine_over(pool, settings, language_model, embedding_model)
}

/// Rewire an engine over an existing pool (e.g. to add a provider to a
/// store that captured without one).
pub fn engine_over(
    pool: Arc<DatabasePool>,
    settings: Settings,
    language_model: Option<Arc<dyn LanguageModel>>,
    embedding_model: Option<Arc<dyn EmbeddingModel>>,
) -> Arc<Engine> {
    let mode = Mode::default_mode();
    let processor = Arc::new(Processor::new(
        pool.clone(),
        language_model.clone(),
        embedding_model.clone(),
        settings.clone(),
        mode.clone(),
    ));
    let redaction_patterns = compile_patterns(&settings.sensitive_patterns);
    Arc::new(Engine {
        settings,
        mode,
        pool,
        user_pool: None,
        language_model,
        embedding_model,
        processor,
        redaction_patterns,
    })
}

/// Default settings rooted at a throwaway path, capture gates loosened.
pub fn test_settings() -> Settings {
    let mut settings = Settings::defaults(Path::new("/tmp/open-mem-test-project"));
    settings.min_output_length = 0;
    settings
}
