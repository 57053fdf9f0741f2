// crates/open-mem-server/src/config/settings.rs
// Resolved engine settings: defaults ← environment ← programmatic overrides

use std::path::{Path, PathBuf};

use super::env::{ConfigValidation, read_bool, read_list, read_num, read_string};
use crate::llm::Provider;

/// Resolved configuration for one project's engine instance.
///
/// Construction order is `Settings::resolve(project_root)`: built-in
/// defaults, then `OPEN_MEM_*` environment variables, and callers mutate
/// the returned struct for programmatic overrides (tests do this freely).
#[derive(Debug, Clone)]
pub struct Settings {
    /// Project root the engine is scoped to.
    pub project_root: PathBuf,
    /// Database path; relative values resolve against the project root.
    pub db_path: PathBuf,
    /// Pinned provider; None means autodetect from credential env presence.
    pub provider: Option<Provider>,
    /// Explicit API key; None falls back to the provider's env var.
    pub api_key: Option<String>,
    /// Model override; None uses the provider default.
    pub model: Option<String>,
    pub max_tokens_per_compression: usize,
    pub compression_enabled: bool,
    pub context_injection_enabled: bool,
    pub max_context_tokens: usize,
    pub batch_size: usize,
    pub batch_interval_ms: u64,
    pub ignored_tools: Vec<String>,
    /// Signed on purpose: a negative value produces a validation error
    /// instead of being silently clamped.
    pub min_output_length: i64,
    pub max_index_entries: usize,
    pub sensitive_patterns: Vec<String>,
    pub retention_days: u32,
    pub max_database_size_mb: u64,
    pub log_level: String,
    pub context_show_token_costs: bool,
    /// Empty means all observation types are eligible for injection.
    pub context_observation_types: Vec<String>,
    pub context_full_observation_count: usize,
    pub max_observations: usize,
    pub context_show_last_summary: bool,
    pub rate_limiting_enabled: bool,
    pub folder_context_enabled: bool,
    pub folder_context_max_depth: usize,
    pub daemon_enabled: bool,
    pub dashboard_enabled: bool,
    pub dashboard_port: u16,
    /// None uses the provider default (Google 768, OpenAI 1536, Bedrock
    /// 1024, Anthropic 0 = vectors disabled).
    pub embedding_dimension: Option<usize>,
    pub user_memory_enabled: bool,
    pub user_memory_db_path: Option<PathBuf>,
    pub user_memory_max_context_tokens: usize,
    pub reranking_enabled: bool,
    pub reranking_max_candidates: usize,
    pub entity_extraction_enabled: bool,
    /// Daemon poll cadence; clamped to >= 100 at the CLI boundary.
    pub poll_interval_ms: u64,
}

impl Settings {
    /// Built-in defaults scoped to a project root.
    pub fn defaults(project_root: &Path) -> Self {
        Self {
            project_root: project_root.to_path_buf(),
            db_path: PathBuf::from(".open-mem/memory.db"),
            provider: None,
            api_key: None,
            model: None,
            max_tokens_per_compression: 1024,
            compression_enabled: true,
            context_injection_enabled: true,
            max_context_tokens: 2000,
            batch_size: 10,
            batch_interval_ms: 30_000,
            ignored_tools: vec!["TodoWrite".to_string(), "AskUserQuestion".to_string()],
            min_output_length: 100,
            max_index_entries: 50,
            sensitive_patterns: Vec::new(),
            retention_days: 0,
            max_database_size_mb: 0,
            log_level: "warn".to_string(),
            context_show_token_costs: true,
            context_observation_types: Vec::new(),
            context_full_observation_count: 3,
            max_observations: 1000,
            context_show_last_summary: true,
            rate_limiting_enabled: true,
            folder_context_enabled: false,
            folder_context_max_depth: 3,
            daemon_enabled: false,
            dashboard_enabled: false,
            dashboard_port: 37842,
            embedding_dimension: None,
            user_memory_enabled: false,
            user_memory_db_path: None,
            user_memory_max_context_tokens: 500,
            reranking_enabled: false,
            reranking_max_candidates: 20,
            entity_extraction_enabled: false,
            poll_interval_ms: 5_000,
        }
    }

    /// Resolve settings for a project: defaults, then environment.
    /// Programmatic overrides are plain field mutation on the result.
    pub fn resolve(project_root: &Path) -> Self {
        let mut settings = Self::defaults(project_root);
        settings.apply_env();
        settings
    }

    /// Layer `OPEN_MEM_*` environment variables over the current values.
    pub fn apply_env(&mut self) {
        if let Some(path) = read_string("DB_PATH") {
            self.db_path = PathBuf::from(path);
        }
        if let Some(provider) = read_string("PROVIDER") {
            match Provider::from_str(&provider) {
                Some(p) => self.provider = Some(p),
                None => tracing::warn!("unknown OPEN_MEM_PROVIDER {provider:?}, autodetecting"),
            }
        }
        if let Some(key) = read_string("API_KEY") {
            self.api_key = Some(key);
        }
        if let Some(model) = read_string("MODEL") {
            self.model = Some(model);
        }
        if let Some(v) = read_num("MAX_TOKENS_PER_COMPRESSION") {
            self.max_tokens_per_compression = v;
        }
        if let Some(v) = read_bool("COMPRESSION_ENABLED") {
            self.compression_enabled = v;
        }
        if let Some(v) = read_bool("CONTEXT_INJECTION_ENABLED") {
            self.context_injection_enabled = v;
        }
        if let Some(v) = read_num("MAX_CONTEXT_TOKENS") {
            self.max_context_tokens = v;
        }
        if let Some(v) = read_num("BATCH_SIZE") {
            self.batch_size = v;
        }
        if let Some(v) = read_num("BATCH_INTERVAL_MS") {
            self.batch_interval_ms = v;
        }
        if let Some(v) = read_list("IGNORED_TOOLS") {
            self.ignored_tools = v;
        }
        if let Some(v) = read_num("MIN_OUTPUT_LENGTH") {
            self.min_output_length = v;
        }
        if let Some(v) = read_num("MAX_INDEX_ENTRIES") {
            self.max_index_entries = v;
        }
        if let Some(v) = read_list("SENSITIVE_PATTERNS") {
            self.sensitive_patterns = v;
        }
        if let Some(v) = read_num("RETENTION_DAYS") {
            self.retention_days = v;
        }
        if let Some(v) = read_num("MAX_DATABASE_SIZE_MB") {
            self.max_database_size_mb = v;
        }
        if let Some(v) = read_string("LOG_LEVEL") {
            self.log_level = v;
        }
        if let Some(v) = read_bool("CONTEXT_SHOW_TOKEN_COSTS") {
            self.context_show_token_costs = v;
        }
        if let Some(v) = read_list("CONTEXT_OBSERVATION_TYPES") {
            self.context_observation_types = v;
        }
        if let Some(v) = read_num("CONTEXT_FULL_OBSERVATION_COUNT") {
            self.context_full_observation_count = v;
        }
        if let Some(v) = read_num("MAX_OBSERVATIONS") {
            self.max_observations = v;
        }
        if let Some(v) = read_bool("CONTEXT_SHOW_LAST_SUMMARY") {
            self.context_show_last_summary = v;
        }
        if let Some(v) = read_bool("RATE_LIMITING_ENABLED") {
            self.rate_limiting_enabled = v;
        }
        if let Some(v) = read_bool("FOLDER_CONTEXT_ENABLED") {
            self.folder_context_enabled = v;
        }
        if let Some(v) = read_num("FOLDER_CONTEXT_MAX_DEPTH") {
            self.folder_context_max_depth = v;
        }
        if let Some(v) = read_bool("DAEMON_ENABLED") {
            self.daemon_enabled = v;
        }
        if let Some(v) = read_bool("DASHBOARD_ENABLED") {
            self.dashboard_enabled = v;
        }
        if let Some(v) = read_num("DASHBOARD_PORT") {
            self.dashboard_port = v;
        }
        if let Some(v) = read_num("EMBEDDING_DIMENSION") {
            self.embedding_dimension = Some(v);
        }
        if let Some(v) = read_bool("USER_MEMORY_ENABLED") {
            self.user_memory_enabled = v;
        }
        if let Some(path) = read_string("USER_MEMORY_DB_PATH") {
            self.user_memory_db_path = Some(PathBuf::from(path));
        }
        if let Some(v) = read_num("USER_MEMORY_MAX_CONTEXT_TOKENS") {
            self.user_memory_max_context_tokens = v;
        }
        if let Some(v) = read_bool("RERANKING_ENABLED") {
            self.reranking_enabled = v;
        }
        if let Some(v) = read_num("RERANKING_MAX_CANDIDATES") {
            self.reranking_max_candidates = v;
        }
        if let Some(v) = read_bool("ENTITY_EXTRACTION_ENABLED") {
            self.entity_extraction_enabled = v;
        }
        if let Some(v) = read_num("POLL_INTERVAL_MS") {
            self.poll_interval_ms = v;
        }
    }

    /// Absolute database path: relative `db_path` resolves against the
    /// project root; absolute paths are preserved.
    pub fn resolved_db_path(&self) -> PathBuf {
        if self.db_path.is_absolute() {
            self.db_path.clone()
        } else {
            self.project_root.join(&self.db_path)
        }
    }

    /// User database path: explicit setting, else `~/.open-mem/user-memory.db`.
    pub fn resolved_user_db_path(&self) -> PathBuf {
        if let Some(ref path) = self.user_memory_db_path {
            return path.clone();
        }
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".open-mem/user-memory.db")
    }

    /// The provider this instance will use, after autodetection.
    pub fn effective_provider(&self) -> Option<Provider> {
        self.provider.or_else(Provider::autodetect)
    }

    /// Effective vector dimension for the embedded index (0 disables it).
    pub fn effective_embedding_dimension(&self) -> usize {
        self.embedding_dimension.unwrap_or_else(|| {
            self.effective_provider()
                .map(|p| p.default_embedding_dimension())
                .unwrap_or(0)
        })
    }

    /// Validate resolved settings.
    pub fn validate(&self) -> ConfigValidation {
        let mut validation = ConfigValidation::new();

        if self.max_context_tokens < 500 {
            validation.add_error(format!(
                "maxContextTokens must be at least 500 (got {})",
                self.max_context_tokens
            ));
        }
        if self.batch_size < 1 {
            validation.add_error("batchSize must be at least 1");
        }
        if self.min_output_length < 0 {
            validation.add_error(format!(
                "minOutputLength must not be negative (got {})",
                self.min_output_length
            ));
        }

        if self.compression_enabled {
            match self.effective_provider() {
                Some(provider) => {
                    let has_key = self.api_key.is_some()
                        || std::env::var(provider.api_key_env_var())
                            .map(|v| !v.trim().is_empty())
                            .unwrap_or(false);
                    if provider.requires_api_key() && !has_key {
                        validation.add_error(format!(
                            "compression enabled but no API key for {provider} (set {})",
                            provider.api_key_env_var()
                        ));
                    }
                }
                None => {
                    validation.add_warning(
                        "no provider credentials detected; compression and embeddings disabled",
                    );
                }
            }
        }

        for pattern in &self.sensitive_patterns {
            if regex::Regex::new(pattern).is_err() {
                validation.add_warning(format!("invalid sensitive pattern ignored: {pattern:?}"));
            }
        }

        validation
    }
}
