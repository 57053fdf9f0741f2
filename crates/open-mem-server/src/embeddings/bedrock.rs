// crates/open-mem-server/src/embeddings/bedrock.rs
// AWS Bedrock Titan embeddings client (bearer-token auth)

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::llm::LlmHttpClient;
use crate::utils::CancelToken;

const MODEL: &str = "amazon.titan-embed-text-v2:0";

const DEFAULT_REGION: &str = "us-east-1";

/// Titan caps input at 8192 tokens; stay well inside it
const MAX_TEXT_CHARS: usize = 30_000;

/// Bedrock Titan embeddings client. Titan has no batch endpoint, so
/// batches are sequential single-text invokes.
pub struct BedrockEmbeddings {
    bearer_token: String,
    region: String,
    dimensions: usize,
    http: LlmHttpClient,
}

impl BedrockEmbeddings {
    pub fn new(bearer_token: String, dimensions: usize) -> Self {
        let region = std::env::var("AWS_REGION")
            .ok()
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_REGION.to_string());
        Self {
            bearer_token,
            region,
            dimensions,
            http: LlmHttpClient::new(),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn model_name(&self) -> &'static str {
        MODEL
    }

    fn invoke_url(&self) -> String {
        format!(
            "https://bedrock-runtime.{}.amazonaws.com/model/{}/invoke",
            self.region, MODEL
        )
    }

    pub async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        let clipped = if text.len() > MAX_TEXT_CHARS {
            &text[..MAX_TEXT_CHARS]
        } else {
            text
        };
        let body = serde_json::json!({
            "inputText": clipped,
            "dimensions": self.dimensions,
            "normalize": true,
        });

        let raw = self
            .http
            .post_json_with_retry(
                &self.invoke_url(),
                &[("Authorization", format!("Bearer {}", self.bearer_token))],
                body,
                cancel,
            )
            .await
            .context("titan embed request failed")?;

        let json: Value = serde_json::from_str(&raw)?;
        let vector: Vec<f32> = json["embedding"]
            .as_array()
            .ok_or_else(|| anyhow!("invalid titan response format"))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        if vector.len() != self.dimensions {
            return Err(anyhow!(
                "dimension mismatch: expected {}, got {}",
                self.dimensions,
                vector.len()
            ));
        }
        Ok(vector)
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>> {
        let mut all = Vec::with_capacity(texts.len());
        for text in texts {
            all.push(self.embed(text, cancel).await?);
        }
        Ok(all)
    }
}
