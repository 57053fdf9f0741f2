// crates/open-mem-server/src/llm/anthropic.rs
// Anthropic Messages API client

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use super::http::LlmHttpClient;
use super::parse::{parse_compression, parse_rerank, parse_summary};
use super::prompt::{compression_prompt, rerank_prompt, summary_prompt};
use super::provider::{
    CompressedObservation, LanguageModel, ModeHints, Provider, RerankCandidate, SummaryFields,
};
use crate::utils::CancelToken;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";

/// Anthropic language model adapter. Compression/summarization/rerank only;
/// Anthropic exposes no embedding endpoint, so the vector index is disabled
/// under this provider.
pub struct AnthropicModel {
    api_key: String,
    model: String,
    max_output_tokens: usize,
    http: LlmHttpClient,
}

impl AnthropicModel {
    pub fn new(api_key: String, model: String, max_output_tokens: usize) -> Self {
        Self {
            api_key,
            model,
            max_output_tokens,
            http: LlmHttpClient::new(),
        }
    }

    async fn complete(&self, prompt: &str, cancel: &CancelToken) -> Result<String> {
        let body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_output_tokens,
            "messages": [{"role": "user", "content": prompt}],
        });

        let raw = self
            .http
            .post_json_with_retry(
                API_URL,
                &[
                    ("x-api-key", self.api_key.clone()),
                    ("anthropic-version", API_VERSION.to_string()),
                ],
                body,
                cancel,
            )
            .await?;

        extract_text(&raw)
    }
}

fn extract_text(raw: &str) -> Result<String> {
    let json: Value = serde_json::from_str(raw)?;
    let blocks = json["content"]
        .as_array()
        .ok_or_else(|| anyhow!("no content blocks in Anthropic response"))?;
    let text: String = blocks
        .iter()
        .filter(|b| b["type"].as_str() == Some("text"))
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(anyhow!("empty text in Anthropic response"));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for AnthropicModel {
    async fn compress(
        &self,
        tool_name: &str,
        output: &str,
        hints: &ModeHints,
        cancel: &CancelToken,
    ) -> Result<CompressedObservation> {
        let raw = self
            .complete(&compression_prompt(tool_name, output, hints), cancel)
            .await?;
        parse_compression(&raw)
    }

    async fn summarize(
        &self,
        observations: &[String],
        cancel: &CancelToken,
    ) -> Result<SummaryFields> {
        let raw = self.complete(&summary_prompt(observations), cancel).await?;
        parse_summary(&raw)
    }

    async fn rerank(
        &self,
        query: &str,
        candidates: &[RerankCandidate],
        cancel: &CancelToken,
    ) -> Result<Vec<usize>> {
        let raw = self
            .complete(&rerank_prompt(query, candidates), cancel)
            .await?;
        parse_rerank(&raw)
    }

    fn provider_type(&self) -> Provider {
        Provider::Anthropic
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
