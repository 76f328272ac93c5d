// src/config/env.rs
// Environment-based configuration - single source of truth for all env vars

use tracing::{debug, warn};

/// Provider credentials loaded from environment variables.
#[derive(Debug, Clone, Default)]
pub struct ProviderKeys {
    /// OpenAI API key (OPENAI_API_KEY)
    pub openai: Option<String>,
    /// Ollama host (KIRO_OLLAMA_HOST or OLLAMA_HOST)
    pub ollama: Option<String>,
}

impl ProviderKeys {
    /// Load provider credentials from environment variables.
    ///
    /// Set `KIRO_DISABLE_EMBEDDINGS=1` to suppress all providers (forces
    /// lexical-only retrieval).
    pub fn from_env() -> Self {
        if read_var("KIRO_DISABLE_EMBEDDINGS").is_some() {
            debug!("KIRO_DISABLE_EMBEDDINGS is set - embedding providers disabled");
            return Self::default();
        }

        let keys = Self {
            openai: read_var("OPENAI_API_KEY"),
            ollama: read_var("KIRO_OLLAMA_HOST").or_else(|| read_var("OLLAMA_HOST")),
        };
        keys.log_status();
        keys
    }

    /// Check if any embedding provider is available.
    pub fn has_embeddings(&self) -> bool {
        self.openai.is_some() || self.ollama.is_some()
    }

    /// Log which providers are available (without exposing values).
    fn log_status(&self) {
        let mut available = Vec::new();
        if self.openai.is_some() {
            available.push("OpenAI");
        }
        if self.ollama.is_some() {
            available.push("Ollama");
        }
        if available.is_empty() {
            warn!("No embedding provider configured - retrieval will be lexical-only");
        } else {
            debug!(providers = ?available, "Embedding providers loaded");
        }
    }
}

/// Embedding configuration from environment variables.
#[derive(Debug, Clone)]
pub struct EmbeddingsConfig {
    /// Vector dimensions (KIRO_EMBEDDING_DIMENSIONS, default 384)
    pub dimensions: usize,
    /// Ollama embedding model override (KIRO_OLLAMA_EMBEDDING_MODEL)
    pub ollama_model: Option<String>,
}

impl Default for EmbeddingsConfig {
    fn default() -> Self {
        Self {
            dimensions: 384,
            ollama_model: None,
        }
    }
}

impl EmbeddingsConfig {
    /// Load embedding configuration from environment variables.
    pub fn from_env() -> Self {
        let dimensions = read_var("KIRO_EMBEDDING_DIMENSIONS")
            .and_then(|d| d.parse().ok())
            .unwrap_or(384);
        Self {
            dimensions,
            ollama_model: read_var("KIRO_OLLAMA_EMBEDDING_MODEL"),
        }
    }
}

/// Read an env var, filtering empty values.
fn read_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_dimensions() {
        let config = EmbeddingsConfig::default();
        assert_eq!(config.dimensions, 384);
        assert!(config.ollama_model.is_none());
    }

    #[test]
    fn test_no_keys_means_no_embeddings() {
        let keys = ProviderKeys::default();
        assert!(!keys.has_embeddings());
    }
}
