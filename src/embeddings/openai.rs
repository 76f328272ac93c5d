// src/embeddings/openai.rs
// OpenAI embeddings API client

use crate::embeddings::MAX_EMBED_CHARS;
use crate::utils::truncate_at_boundary;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// HTTP timeout
const TIMEOUT_SECS: u64 = 30;

/// Retry attempts
const RETRY_ATTEMPTS: usize = 2;

/// API endpoint
const API_URL: &str = "https://api.openai.com/v1/embeddings";

/// Default model; supports the `dimensions` request parameter, which lets the
/// engine ask for its configured vector size directly.
const DEFAULT_MODEL: &str = "text-embedding-3-small";

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// OpenAI embeddings client
pub struct OpenAiEmbeddings {
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OpenAiEmbeddings {
    /// Create a new client with the default model and requested dimensions.
    pub fn new(api_key: String, dimensions: usize) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            api_key,
            model: DEFAULT_MODEL.to_string(),
            dimensions,
            http_client,
        }
    }

    /// Get embedding dimensions
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Get model name
    pub fn model_name(&self) -> &str {
        &self.model
    }

    /// Embed a single text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let input = if text.len() > MAX_EMBED_CHARS {
            debug!(
                "Truncating text from {} to {} chars for OpenAI embedding",
                text.len(),
                MAX_EMBED_CHARS
            );
            truncate_at_boundary(text, MAX_EMBED_CHARS)
        } else {
            text
        };

        let body = serde_json::json!({
            "input": input,
            "model": self.model,
            "dimensions": self.dimensions,
        });

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(500 * attempt as u64)).await;
            }

            match self
                .http_client
                .post(API_URL)
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let resp: EmbeddingResponse = response
                            .json()
                            .await
                            .context("Failed to parse OpenAI embedding response")?;

                        return resp
                            .data
                            .into_iter()
                            .next()
                            .map(|d| d.embedding)
                            .ok_or_else(|| {
                                anyhow::anyhow!("Empty embedding response from OpenAI")
                            });
                    }

                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!(
                        "OpenAI embedding request failed ({}): {}",
                        status,
                        body_text
                    ));

                    // Client errors won't improve on retry
                    if status.is_client_error() && status != reqwest::StatusCode::TOO_MANY_REQUESTS
                    {
                        break;
                    }
                }
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("OpenAI embedding request error: {}", e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("OpenAI embedding failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = OpenAiEmbeddings::new("sk-test".to_string(), 384);
        assert_eq!(client.dimensions(), 384);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }
}
