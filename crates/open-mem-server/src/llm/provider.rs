// crates/open-mem-server/src/llm/provider.rs
// LLM provider abstraction layer

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::utils::CancelToken;
use open_mem_types::ObservationType;

/// LLM provider types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Google,
    Anthropic,
    Bedrock,
    /// Embeddings only; not a compression/summarization provider.
    OpenAi,
}

impl Provider {
    /// Parse provider from string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "google" | "gemini" => Some(Self::Google),
            "anthropic" => Some(Self::Anthropic),
            "bedrock" => Some(Self::Bedrock),
            "openai" => Some(Self::OpenAi),
            _ => None,
        }
    }

    /// Get the environment variable name for this provider's API key
    pub fn api_key_env_var(&self) -> &'static str {
        match self {
            Self::Google => "GEMINI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
            Self::Bedrock => "AWS_BEARER_TOKEN_BEDROCK",
            Self::OpenAi => "OPENAI_API_KEY",
        }
    }

    /// Default model for this provider
    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Google => "gemini-2.5-flash",
            Self::Anthropic => "claude-haiku-4-5",
            Self::Bedrock => "anthropic.claude-haiku-4-5-20251001-v1:0",
            Self::OpenAi => "gpt-4o-mini",
        }
    }

    /// Default embedding dimension for this provider.
    /// Zero disables the vector index entirely.
    pub fn default_embedding_dimension(&self) -> usize {
        match self {
            Self::Google => 768,
            Self::OpenAi => 1536,
            Self::Bedrock => 1024,
            Self::Anthropic => 0,
        }
    }

    /// Whether the provider needs an API key for compression to work.
    pub fn requires_api_key(&self) -> bool {
        // Bedrock can also authenticate via ambient AWS credentials; the
        // other providers are key-only.
        !matches!(self, Self::Bedrock)
    }

    /// Whether this provider's free tier is strict enough that the token
    /// bucket should gate calls when rate limiting is enabled.
    pub fn quota_sensitive(&self) -> bool {
        matches!(self, Self::Google)
    }

    /// Autodetect a provider from credential env presence.
    /// Priority: Google → Anthropic → Bedrock.
    pub fn autodetect() -> Option<Self> {
        for provider in [Self::Google, Self::Anthropic, Self::Bedrock] {
            if std::env::var(provider.api_key_env_var())
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
            {
                return Some(provider);
            }
        }
        None
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Google => write!(f, "google"),
            Self::Anthropic => write!(f, "anthropic"),
            Self::Bedrock => write!(f, "bedrock"),
            Self::OpenAi => write!(f, "openai"),
        }
    }
}

/// Structured result of one compression call, before persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompressedObservation {
    #[serde(rename = "type")]
    pub kind: ObservationType,
    pub title: String,
    #[serde(default)]
    pub subtitle: String,
    #[serde(default)]
    pub facts: Vec<String>,
    pub narrative: String,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub files_read: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default = "default_importance")]
    pub importance: i64,
}

fn default_importance() -> i64 {
    3
}

/// Structured result of one summarization call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryFields {
    pub summary: String,
    #[serde(default)]
    pub key_decisions: Vec<String>,
    #[serde(default)]
    pub files_modified: Vec<String>,
    #[serde(default)]
    pub concepts: Vec<String>,
    #[serde(default)]
    pub request: Option<String>,
    #[serde(default)]
    pub investigated: Option<String>,
    #[serde(default)]
    pub learned: Option<String>,
    #[serde(default)]
    pub completed: Option<String>,
    #[serde(default)]
    pub next_steps: Option<String>,
}

/// Mode-derived hints steering the compression prompt (allowed observation
/// types, concept vocabulary).
#[derive(Debug, Clone, Default)]
pub struct ModeHints {
    pub observation_types: Vec<String>,
    pub concept_vocabulary: Vec<String>,
}

/// Candidate passed to the reranker: id plus the text shown to the model.
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    pub id: String,
    pub text: String,
}

/// Trait for language-model capabilities - all providers must implement this.
///
/// Any method may fail transiently; callers go through the retry layer.
/// The trait object may be absent entirely (no credentials), in which case
/// compression, summarization, and reranking are skipped. Every operation
/// accepts an abort token; an aborted attempt fails non-retryably.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Compress one raw tool output into a structured observation.
    async fn compress(
        &self,
        tool_name: &str,
        output: &str,
        hints: &ModeHints,
        cancel: &CancelToken,
    ) -> Result<CompressedObservation>;

    /// Summarize a batch of observation digests into session summary fields.
    async fn summarize(
        &self,
        observations: &[String],
        cancel: &CancelToken,
    ) -> Result<SummaryFields>;

    /// Reorder candidates by relevance to the query. Returns a permutation
    /// of indices into `candidates`; malformed output is the caller's
    /// problem to degrade from.
    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        cancel: &CancelToken,
    ) -> Result<Vec<usize>>;

    /// Get the provider type
    fn provider_type(&self) -> Provider;

    /// Get the model name
    fn model_name(&self) -> String;
}
