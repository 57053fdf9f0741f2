// crates/open-mem-server/src/llm/google.rs
// Google Gemini generateContent client

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use super::http::LlmHttpClient;
use super::parse::{parse_compression, parse_rerank, parse_summary};
use super::prompt::{compression_prompt, rerank_prompt, summary_prompt};
use super::provider::{
    CompressedObservation, LanguageModel, ModeHints, Provider, RerankCandidate, SummaryFields,
};
use super::rate_limit::RateLimiterRegistry;
use crate::utils::CancelToken;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Google Gemini language model adapter
pub struct GoogleModel {
    api_key: String,
    model: String,
    max_output_tokens: usize,
    rate_limiting: bool,
    http: LlmHttpClient,
}

impl GoogleModel {
    pub fn new(
        api_key: String,
        model: String,
        max_output_tokens: usize,
        rate_limiting: bool,
    ) -> Self {
        Self {
            api_key,
            model,
            max_output_tokens,
            rate_limiting,
            http: LlmHttpClient::new(),
        }
    }

    /// One text-in/text-out completion. The free tier throttles hard, so
    /// the token bucket gates every call when rate limiting is enabled.
    async fn complete(&self, prompt: &str, cancel: &CancelToken) -> Result<String> {
        if self.rate_limiting && Provider::Google.quota_sensitive() {
            RateLimiterRegistry::global()
                .acquire(&self.model, None)
                .await;
        }

        let url = format!("{}/{}:generateContent", API_BASE, self.model);
        let body = serde_json::json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": {
                "temperature": 0.2,
                "maxOutputTokens": self.max_output_tokens,
            }
        });

        let raw = self
            .http
            .post_json_with_retry(
                &url,
                &[("x-goog-api-key", self.api_key.clone())],
                body,
                cancel,
            )
            .await?;

        extract_text(&raw)
    }
}

/// Pull the concatenated text parts out of a generateContent response.
fn extract_text(raw: &str) -> Result<String> {
    let json: Value = serde_json::from_str(raw)?;
    let parts = json["candidates"][0]["content"]["parts"]
        .as_array()
        .ok_or_else(|| anyhow!("no candidates in Gemini response"))?;
    let text: String = parts
        .iter()
        .filter_map(|p| p["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(anyhow!("empty text in Gemini response"));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for GoogleModel {
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
        Provider::Google
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}
