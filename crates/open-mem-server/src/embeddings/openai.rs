// crates/open-mem-server/src/embeddings/openai.rs
// OpenAI embeddings API client

use anyhow::{Context, Result, anyhow};
use serde_json::Value;

use crate::llm::LlmHttpClient;
use crate::utils::CancelToken;

const API_URL: &str = "https://api.openai.com/v1/embeddings";

const MODEL: &str = "text-embedding-3-small";

/// Max characters to embed per input (8191-token model limit, ~4 chars/token)
const MAX_TEXT_CHARS: usize = 32_000;

/// Max inputs per request
const MAX_BATCH_SIZE: usize = 256;

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    api_key: String,
    dimensions: usize,
    http: LlmHttpClient,
}

impl OpenAiEmbeddings {
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

    async fn request(&self, inputs: Vec<&str>, cancel: &CancelToken) -> Result<Vec<Vec<f32>>> {
        let body = serde_json::json!({
            "model": MODEL,
            "input": inputs,
            "dimensions": self.dimensions,
        });

        let raw = self
            .http
            .post_json_with_retry(
                API_URL,
                &[("Authorization", format!("Bearer {}", self.api_key))],
                body,
                cancel,
            )
            .await
            .context("embeddings request failed")?;

        let json: Value = serde_json::from_str(&raw)?;
        let data = json["data"]
            .as_array()
            .ok_or_else(|| anyhow!("invalid embeddings response format"))?;

        // The API may reorder; restore input order by index
        let mut rows: Vec<(usize, Vec<f32>)> = Vec::with_capacity(data.len());
        for item in data {
            let index = item["index"]
                .as_u64()
                .ok_or_else(|| anyhow!("missing index in embeddings response"))?
                as usize;
            let vector: Vec<f32> = item["embedding"]
                .as_array()
                .ok_or_else(|| anyhow!("missing embedding in response"))?
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            rows.push((index, vector));
        }
        rows.sort_by_key(|(i, _)| *i);
        Ok(rows.into_iter().map(|(_, v)| v).collect())
    }

    pub async fn embed(&self, text: &str, cancel: &CancelToken) -> Result<Vec<f32>> {
        let mut vectors = self.request(vec![Self::clip(text)], cancel).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow!("empty embeddings response"))
    }

    pub async fn embed_batch(
        &self,
        texts: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(MAX_BATCH_SIZE) {
            let inputs: Vec<&str> = chunk.iter().map(|t| Self::clip(t)).collect();
            all.extend(self.request(inputs, cancel).await?);
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_bounds_input_length() {
        let long = "b".repeat(MAX_TEXT_CHARS + 1);
        assert_eq!(OpenAiEmbeddings::clip(&long).len(), MAX_TEXT_CHARS);
    }
}
