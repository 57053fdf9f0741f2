// crates/open-mem-server/src/llm/mod.rs
// Language-model gateway: provider trait, adapters, retry + rate limiting

mod anthropic;
mod bedrock;
mod factory;
mod google;
mod http;
mod parse;
mod prompt;
mod provider;
mod rate_limit;

pub use anthropic::AnthropicModel;
pub use bedrock::BedrockModel;
pub use factory::build_language_model;
pub use google::GoogleModel;
pub use http::{LlmHttpClient, is_retryable_status};
pub use parse::{parse_compression, parse_rerank, parse_summary};
pub use prompt::{compression_prompt, rerank_prompt, summary_prompt};
pub use provider::{
    CompressedObservation, LanguageModel, ModeHints, Provider, RerankCandidate, SummaryFields,
};
pub use rate_limit::RateLimiterRegistry;
