// crates/open-mem-server/src/embeddings/mod.rs
// Embedding provider module

mod bedrock;
mod google;
mod openai;

pub use self::bedrock::BedrockEmbeddings;
pub use self::google::GoogleEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::Settings;
use crate::llm::Provider;
use crate::utils::CancelToken;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

/// Trait for embedding capability. May be absent entirely; retrieval then
/// runs FTS-only and ingest skips the vector projection.
#[async_trait]
pub trait EmbeddingModel: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>>;

    /// Embed multiple texts in batch
    async fn embed_batch(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>>;

    /// Fixed output dimension (the vec table is sized to this at creation)
    fn dimensions(&self) -> usize;

    /// Model name for display/logging
    fn model_name(&self) -> String;
}

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    Google(GoogleEmbeddings),
    OpenAi(OpenAiEmbeddings),
    Bedrock(BedrockEmbeddings),
}

/// Embedding client with provider selection from settings.
///
/// Dimension defaults are provider-specific (Google 768, OpenAI 1536,
/// Bedrock 1024); Anthropic has none, which disables the vector index.
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// Build from resolved settings. Returns None when no embedding
    /// provider is usable (no key, or dimension resolved to zero).
    pub fn from_settings(settings: &Settings) -> Option<Self> {
        let provider = settings.provider.or_else(Provider::autodetect)?;
        let dimension = settings
            .embedding_dimension
            .unwrap_or_else(|| provider.default_embedding_dimension());
        if dimension == 0 {
            return None;
        }

        let read_key = |var: &str| {
            settings
                .api_key
                .clone()
                .or_else(|| std::env::var(var).ok().filter(|k| !k.trim().is_empty()))
        };

        let backend = match provider {
            Provider::Google => {
                let key = read_key(Provider::Google.api_key_env_var())?;
                info!(dimension, "using Google embeddings");
                EmbeddingBackend::Google(GoogleEmbeddings::new(key, dimension))
            }
            Provider::OpenAi => {
                let key = read_key(Provider::OpenAi.api_key_env_var())?;
                info!(dimension, "using OpenAI embeddings");
                EmbeddingBackend::OpenAi(OpenAiEmbeddings::new(key, dimension))
            }
            Provider::Bedrock => {
                let key = read_key(Provider::Bedrock.api_key_env_var())?;
                info!(dimension, "using Bedrock Titan embeddings");
                EmbeddingBackend::Bedrock(BedrockEmbeddings::new(key, dimension))
            }
            // Anthropic exposes no embedding endpoint
            Provider::Anthropic => return None,
        };

        Some(Self { backend })
    }
}

#[async_trait]
impl EmbeddingModel for EmbeddingClient {
    async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::Google(c) => c.embed(text, cancel).await,
            EmbeddingBackend::OpenAi(c) => c.embed(text, cancel).await,
            EmbeddingBackend::Bedrock(c) => c.embed(text, cancel).await,
        }
    }

    async fn embed_batch(&self, texts: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        match &self.backend {
            EmbeddingBackend::Google(c) => c.embed_batch(texts, cancel).await,
            EmbeddingBackend::OpenAi(c) => c.embed_batch(texts, cancel).await,
            EmbeddingBackend::Bedrock(c) => c.embed_batch(texts, cancel).await,
        }
    }

    fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::Google(c) => c.dimensions(),
            EmbeddingBackend::OpenAi(c) => c.dimensions(),
            EmbeddingBackend::Bedrock(c) => c.dimensions(),
        }
    }

    fn model_name(&self) -> String {
        match &self.backend {
            EmbeddingBackend::Google(c) => c.model_name().to_string(),
            EmbeddingBackend::OpenAi(c) => c.model_name().to_string(),
            EmbeddingBackend::Bedrock(c) => c.model_name().to_string(),
        }
    }
}

/// Build the embedding model from settings, or None.
pub fn build_embedding_model(settings: &Settings) -> Option<Arc<dyn EmbeddingModel>> {
    EmbeddingClient::from_settings(settings).map(|c| Arc::new(c) as Arc<dyn EmbeddingModel>)
}

/// Cosine similarity between two vectors of equal length.
/// Used by the fallback vector search when the native index is absent.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.5f32, -0.2, 0.8];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_handles_degenerate_input() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 2.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }
}
