// crates/open-mem-server/src/llm/factory.rs
// Provider selection from resolved settings

use std::sync::Arc;

use super::anthropic::AnthropicModel;
use super::bedrock::BedrockModel;
use super::google::GoogleModel;
use super::provider::{LanguageModel, Provider};
use crate::config::Settings;

/// Build the language model from settings, or None when the configuration
/// cannot support one. Absence degrades gracefully: capture keeps queueing,
/// retrieval falls back to FTS-only.
pub fn build_language_model(settings: &Settings) -> Option<Arc<dyn LanguageModel>> {
    let provider = settings.provider.or_else(Provider::autodetect)?;

    let api_key = settings
        .api_key
        .clone()
        .or_else(|| read_env_key(provider.api_key_env_var()));

    let model = settings
        .model
        .clone()
        .unwrap_or_else(|| provider.default_model().to_string());
    let max_tokens = settings.max_tokens_per_compression;

    match provider {
        Provider::Google => {
            let key = api_key?;
            Some(Arc::new(GoogleModel::new(
                key,
                model,
                max_tokens,
                settings.rate_limiting_enabled,
            )))
        }
        Provider::Anthropic => {
            let key = api_key?;
            Some(Arc::new(AnthropicModel::new(key, model, max_tokens)))
        }
        Provider::Bedrock => {
            let key = api_key?;
            Some(Arc::new(BedrockModel::new(key, model, max_tokens)))
        }
        Provider::OpenAi => {
            tracing::warn!("openai is an embeddings-only provider; compression disabled");
            None
        }
    }
}

fn read_env_key(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|k| !k.trim().is_empty())
}
