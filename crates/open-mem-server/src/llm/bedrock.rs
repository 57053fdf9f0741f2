// crates/open-mem-server/src/llm/bedrock.rs
// AWS Bedrock converse API client (bearer-token auth)

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

const DEFAULT_REGION: &str = "us-east-1";

/// AWS Bedrock adapter using the converse endpoint with API-key bearer
/// auth (`AWS_BEARER_TOKEN_BEDROCK`). SigV4 signing is out of scope; the
/// bearer scheme covers the managed-key path Bedrock exposes for it.
pub struct BedrockModel {
    bearer_token: String,
    model: String,
    region: String,
    max_output_tokens: usize,
    http: LlmHttpClient,
}

impl BedrockModel {
    pub fn new(bearer_token: String, model: String, max_output_tokens: usize) -> Self {
        let region = std::env::var("AWS_REGION")
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self {
            bearer_token,
            model,
            region,
            max_output_tokens,
            http: LlmHttpClient::new(),
        }
    }

    fn converse_url(&self) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/converse",
            self.region, self.model
        )
    }

    async fn complete(&self, prompt: &str, cancel: &CancelToken) -> Result<String> {
        let body = serde_json::json!({
            "messages": [{"role": "user", "content": [{"text": prompt}]}],
            "inferenceConfig": {
                "maxTokens": self.max_output_tokens,
                "temperature": 0.2,
            }
        });

        let raw = self
            .http
            .post_json_with_retry(
                &self.converse_url(),
                &[("Authorization", format!("Bearer {}", self.bearer_token))],
                body,
                cancel,
            )
            .await?;

        extract_text(&raw)
    }
}

fn extract_text(raw: &str) -> Result<String> {
    let json: Value = serde_json::from_str(raw)?;
    let blocks = json["output"]["message"]["content"]
        .as_array()
        .ok_or_else(|| anyhow!("no output message in Bedrock response"))?;
    let text: String = blocks
        .iter()
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(anyhow!("empty text in Bedrock response"));
    }
    Ok(text)
}

#[async_trait]
impl LanguageModel for BedrockModel {
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
        Provider::Bedrock
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_converse_text() {
        let raw = r#"{"output": {"message": {"role": "assistant",
            "content": [{"text": "{\"title\": \"T\"}"}]}}}"#;
        assert_eq!(extract_text(raw).unwrap(), "{\"title\": \"T\"}");
    }

    #[test]
    fn errors_without_output() {
        assert!(extract_text(r#"{"stopReason": "end_turn"}"#).is_err());
    }
}
