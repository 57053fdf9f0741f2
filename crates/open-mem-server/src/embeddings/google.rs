// crates/open-mem-server/src/embeddings/google.rs
// Google Gemini embeddings API client

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::llm::LlmHttpClient;
use crate::utils::CancelToken;

/// API endpoint for Gemini embeddings
const API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Embedding model
const MODEL: &str = "gemini-embedding-001";

/// Max input tokens (Google limit)
const MAX_INPUT_TOKENS: usize = 2048;

/// Approximate chars per token (conservative estimate)
const CHARS_PER_TOKEN: usize = 4;

/// Max characters to embed (based on token limit)
const MAX_TEXT_CHARS: usize = MAX_INPUT_TOKENS * CHARS_PER_TOKEN;

/// Max batch size for batchEmbedContents
const MAX_BATCH_SIZE: usize = 100;

/// Google Gemini embeddings client
pub struct GoogleEmbeddings {
    api_key: String,
    dimensions: usize,
    http: LlmHttpClient,
}

impl GoogleEmbeddings {
    pub fn new(api_key: String, dimensions: usize) -> Self {
        Self {
            api_key,
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

    fn clip(text: &str) -> &str {
        if text.len() > MAX_TEXT_CHARS {
            &text[..MAX_TEXT_CHARS]
        } else {
            text
        }
    }

    pub async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        let body = serde_json::json!({
            "model": format!("models/{MODEL}"),
            "content": {"parts": [{"text": Self::clip(text)}]},
            "taskType": "RETRIEVAL_DOCUMENT",
            "outputDimensionality": self.dimensions,
        });

        let raw = self
            .http
            .post_json_with_retry(
                &format!("{API_URL}/{MODEL}:embedContent"),
                &[("x-goog-api-key", self.api_key.clone())],
                body,
                cancel,
            )
            .await
            .context("embed request failed")?;

        let json: Value = serde_json::from_str(&raw)?;
        let values = json["embedding"]["values"]
            .as_array()
            .ok_or_else(|| anyhow!("invalid embedding response format"))?;
        let vector: Vec<f32> = values
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
        if texts.is_empty() {
            return Ok(vec![]);
        }

        // Chunks fan out as parallel batchEmbedContents requests; results
        // collect back in input order
        let futures: Vec<_> = texts
            .chunks(MAX_BATCH_SIZE)
            .map(|chunk| self.embed_chunk(chunk, cancel))
            .collect();
        let results = futures::future::join_all(futures).await;

        let mut all = Vec::with_capacity(texts.len());
        for result in results {
            all.extend(result?);
        }
        Ok(all)
    }

    async fn embed_chunk(&self, chunk: &[String], cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        let requests: Vec<Value> = chunk
            .iter()
            .map(|text| {
                serde_json::json!({
                    "model": format!("models/{MODEL}"),
                    "content": {"parts": [{"text": Self::clip(text)}]},
                    "taskType": "RETRIEVAL_DOCUMENT",
                    "outputDimensionality": self.dimensions,
                })
            })
            .collect();

        let raw = self
            .http
            .post_json_with_retry(
                &format!("{API_URL}/{MODEL}:batchEmbedContents"),
                &[("x-goog-api-key", self.api_key.clone())],
                serde_json::json!({"requests": requests}),
                cancel,
            )
            .await
            .context("batch embed request failed")?;

        let json: Value = serde_json::from_str(&raw)?;
        let embeddings = json["embeddings"]
            .as_array()
            .ok_or_else(|| anyhow!("invalid batch response format"))?;

        let mut out = Vec::with_capacity(chunk.len());
        for embedding in embeddings {
            let values = embedding["values"]
                .as_array()
                .ok_or_else(|| anyhow!("missing values in embedding response"))?;
            out.push(
                values
                    .iter()
                    .filter_map(|v| v.as_f64().map(|f| f as f32))
                    .collect(),
            );
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_bounds_input_length() {
        let long = "a".repeat(MAX_TEXT_CHARS * 2);
        assert_eq!(GoogleEmbeddings::clip(&long).len(), MAX_TEXT_CHARS);
        assert_eq!(GoogleEmbeddings::clip("short"), "short");
    }
}
