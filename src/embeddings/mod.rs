// src/embeddings/mod.rs
// Embedding provider module

mod ollama;
mod openai;

pub use self::ollama::OllamaEmbeddings;
pub use self::openai::OpenAiEmbeddings;

use crate::config::{EmbeddingsConfig, ProviderKeys};
use anyhow::Result;
use tracing::info;

/// Max characters fed to a provider for one text; longer inputs are
/// truncated at a char boundary before the call.
pub const MAX_EMBED_CHARS: usize = 2000;

/// Backend-specific embedding implementation
enum EmbeddingBackend {
    OpenAi(OpenAiEmbeddings),
    Ollama(OllamaEmbeddings),
}

/// Embedding client with automatic provider selection.
///
/// Priority: OpenAI (highest quality) > Ollama (local, no key needed).
/// When neither is configured `from_env` returns None and every downstream
/// vector operation degrades to lexical-only.
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    /// Provider identifier for the stored model tag and observability.
    pub fn provider_id(&self) -> &'static str {
        match &self.backend {
            EmbeddingBackend::OpenAi(_) => "openai",
            EmbeddingBackend::Ollama(_) => "ollama",
        }
    }

    /// Create a client from pre-loaded configuration.
    pub fn from_config(keys: &ProviderKeys, config: &EmbeddingsConfig) -> Option<Self> {
        if let Some(api_key) = keys.openai.as_ref() {
            let client = OpenAiEmbeddings::new(api_key.clone(), config.dimensions);
            info!(
                model = client.model_name(),
                dimensions = client.dimensions(),
                "Using OpenAI embeddings"
            );
            return Some(Self {
                backend: EmbeddingBackend::OpenAi(client),
            });
        }

        if let Some(host) = keys.ollama.as_ref() {
            let client = OllamaEmbeddings::new(
                host.clone(),
                config.ollama_model.clone(),
                config.dimensions,
            );
            info!(
                model = client.model_name(),
                dimensions = client.dimensions(),
                "Using Ollama embeddings"
            );
            return Some(Self {
                backend: EmbeddingBackend::Ollama(client),
            });
        }

        None
    }

    /// Create a client from environment configuration.
    pub fn from_env() -> Option<Self> {
        Self::from_config(&ProviderKeys::from_env(), &EmbeddingsConfig::from_env())
    }

    /// Vector dimensions produced by the active backend.
    pub fn dimensions(&self) -> usize {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.dimensions(),
            EmbeddingBackend::Ollama(c) => c.dimensions(),
        }
    }

    /// Model name for the stored model tag.
    pub fn model_name(&self) -> String {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.model_name().to_string(),
            EmbeddingBackend::Ollama(c) => c.model_name().to_string(),
        }
    }

    /// Embed a single text (truncated to [`MAX_EMBED_CHARS`] by the backend).
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::OpenAi(c) => c.embed(text).await,
            EmbeddingBackend::Ollama(c) => c.embed(text).await,
        }
    }
}
