// crates/open-mem-server/src/engine.rs
// Per-project engine wiring: one pool, one processor, one search engine

use std::sync::Arc;

use anyhow::Result;

use crate::config::{Mode, ModeLoader, Settings};
use crate::db::pool::DatabasePool;
use crate::embeddings::{EmbeddingModel, build_embedding_model};
use crate::llm::{LanguageModel, build_language_model};
use crate::processor::Processor;
use crate::search::SearchEngine;

/// Everything one project instance needs, wired once per process.
/// Hook handlers and tool dispatch hold an `Arc<Engine>`.
pub struct Engine {
    pub settings: Settings,
    pub mode: Mode,
    pub pool: Arc<DatabasePool>,
    pub user_pool: Option<Arc<DatabasePool>>,
    pub language_model: Option<Arc<dyn LanguageModel>>,
    pub embedding_model: Option<Arc<dyn EmbeddingModel>>,
    pub processor: Arc<Processor>,
    pub redaction_patterns: Vec<regex::Regex>,
}

impl Engine {
    /// Open databases and construct the pipeline from resolved settings.
    ///
    /// A misconfigured system still loads: missing credentials disable
    /// compression/embedding, an unreachable user DB disables user scope.
    /// Only an unusable project DB directory is fatal.
    pub async fn init(settings: Settings) -> Result<Arc<Self>> {
        let validation = settings.validate();
        for warning in &validation.warnings {
            tracing::warn!("[config] {warning}");
        }
        for error in &validation.errors {
            tracing::error!("[config] {error}");
        }

        let db_path = settings.resolved_db_path();
        let dimension = settings.effective_embedding_dimension();
        let pool = Arc::new(DatabasePool::open(&db_path, dimension).await?);

        let user_pool = if settings.user_memory_enabled {
            match DatabasePool::open_user_db(&settings.resolved_user_db_path()).await {
                Ok(pool) => Some(Arc::new(pool)),
                Err(e) => {
                    tracing::warn!("user memory disabled (cannot open user DB): {e}");
                    None
                }
            }
        } else {
            None
        };

        // Invalid config (e.g. key missing) degrades to capture-only
        let language_model = if settings.compression_enabled && validation.is_valid() {
            build_language_model(&settings)
        } else {
            None
        };
        let embedding_model = build_embedding_model(&settings);

        let mode = ModeLoader::global().load(
            &ModeLoader::default_modes_dir(),
            crate::config::DEFAULT_MODE_ID,
        );

        let processor = Arc::new(Processor::new(
            pool.clone(),
            language_model.clone(),
            embedding_model.clone(),
            settings.clone(),
            mode.clone(),
        ));

        if settings.dashboard_enabled {
            tracing::info!(
                "dashboard enabled on port {} (served by the separate dashboard process)",
                settings.dashboard_port
            );
        }

        let redaction_patterns = compile_patterns(&settings.sensitive_patterns);

        Ok(Arc::new(Self {
            settings,
            mode,
            pool,
            user_pool,
            language_model,
            embedding_model,
            processor,
            redaction_patterns,
        }))
    }

    /// Build a search engine view over this engine's pools and models.
    pub fn search_engine(&self) -> SearchEngine {
        SearchEngine::new(
            self.pool.clone(),
            self.user_pool.clone(),
            self.language_model.clone(),
            self.embedding_model.clone(),
            self.settings.clone(),
        )
    }

    /// Test constructor over an in-memory pool with injectable models.
    #[cfg(test)]
    pub fn for_tests(
        pool: Arc<DatabasePool>,
        settings: Settings,
        language_model: Option<Arc<dyn LanguageModel>>,
        embedding_model: Option<Arc<dyn EmbeddingModel>>,
    ) -> Arc<Self> {
        let mode = Mode::default_mode();
        let processor = Arc::new(Processor::new(
            pool.clone(),
            language_model.clone(),
            embedding_model.clone(),
            settings.clone(),
            mode.clone(),
        ));
        let redaction_patterns = compile_patterns(&settings.sensitive_patterns);
        Arc::new(Self {
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
}

/// Compile sensitive patterns, dropping invalid ones with a warning.
pub fn compile_patterns(patterns: &[String]) -> Vec<regex::Regex> {
    patterns
        .iter()
        .filter_map(|pattern| match regex::Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!("ignoring invalid sensitive pattern {pattern:?}: {e}");
                None
            }
        })
        .collect()
}
