// src/embeddings/ollama.rs
// Ollama embeddings via OpenAI-compatible /v1/embeddings endpoint

use crate::embeddings::MAX_EMBED_CHARS;
use crate::utils::truncate_at_boundary;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default Ollama embedding model
const DEFAULT_MODEL: &str = "all-minilm";

/// Retry attempts
const RETRY_ATTEMPTS: usize = 1;

/// OpenAI-compatible embedding response types (shared shape with openai.rs)
#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Ollama embeddings client (OpenAI-compatible endpoint, no auth required)
pub struct OllamaEmbeddings {
    base_url: String,
    model: String,
    dimensions: usize,
    http_client: reqwest::Client,
}

impl OllamaEmbeddings {
    /// Create a new Ollama embeddings client
    pub fn new(base_url: String, model: Option<String>, dimensions: usize) -> Self {
        let model = model.unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let base_url = base_url.trim_end_matches('/').to_string();

        let http_client = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            base_url,
            model,
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
                "Truncating text from {} to {} chars for Ollama embedding",
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
        });

        let url = format!("{}/v1/embeddings", self.base_url);

        let mut last_error = None;
        for attempt in 0..=RETRY_ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_millis(1000)).await;
            }

            match self
                .http_client
                .post(&url)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await
            {
                Ok(response) => {
                    if response.status().is_success() {
                        let resp: EmbeddingResponse = response
                            .json()
                            .await
                            .context("Failed to parse Ollama embedding response")?;

                        let embedding = resp
                            .data
                            .into_iter()
                            .next()
                            .map(|d| d.embedding)
                            .ok_or_else(|| {
                                anyhow::anyhow!("Empty embedding response from Ollama")
                            })?;

                        if embedding.len() != self.dimensions {
                            debug!(
                                "Ollama embedding dimensions: expected {}, got {}",
                                self.dimensions,
                                embedding.len()
                            );
                        }

                        return Ok(embedding);
                    }

                    let status = response.status();
                    let body_text = response.text().await.unwrap_or_default();
                    last_error = Some(anyhow::anyhow!(
                        "Ollama embedding request failed ({}): {}",
                        status,
                        body_text
                    ));
                }
                Err(e) => {
                    last_error = Some(anyhow::anyhow!("Ollama embedding request error: {}", e));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| anyhow::anyhow!("Ollama embedding failed")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let client = OllamaEmbeddings::new("http://localhost:11434".to_string(), None, 384);
        assert_eq!(client.dimensions(), 384);
        assert_eq!(client.model_name(), DEFAULT_MODEL);
    }

    #[test]
    fn test_custom_model() {
        let client = OllamaEmbeddings::new(
            "http://localhost:11434".to_string(),
            Some("mxbai-embed-large".to_string()),
            1024,
        );
        assert_eq!(client.dimensions(), 1024);
        assert_eq!(client.model_name(), "mxbai-embed-large");
    }

    #[test]
    fn test_base_url_normalization() {
        let client = OllamaEmbeddings::new("http://localhost:11434/".to_string(), None, 384);
        assert_eq!(client.base_url, "http://localhost:11434");
    }
}
