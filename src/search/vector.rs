// src/search/vector.rs
// Vector index: persisted per-observation embeddings with a brute-force
// cosine scan filtered by project
//
// Brute force is deliberate: the index is per-developer and stays well
// below 10^6 rows, and the Store's memory map keeps the working set hot.
// Callers never observe the retrieval algorithm through the API.

use crate::db::embeddings::{
    embedding_stats_sync, embeddings_for_project_sync, observations_missing_embeddings_sync,
    put_embedding_sync, EmbeddingStats,
};
use crate::db::pool::DatabasePool;
use crate::embeddings::{EmbeddingClient, MAX_EMBED_CHARS};
use crate::error::Result;
use crate::search::utils::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};
use crate::utils::truncate_at_boundary;
use std::sync::Arc;

/// Default similarity threshold: hits below it are discarded.
pub const DEFAULT_SIMILARITY_THRESHOLD: f32 = 0.3;

/// Options for a vector scan.
#[derive(Debug, Clone, Default)]
pub struct VectorSearchOptions {
    pub project: Option<String>,
    pub limit: usize,
    /// Overrides [`DEFAULT_SIMILARITY_THRESHOLD`] when set.
    pub threshold: Option<f32>,
}

/// One scan hit.
#[derive(Debug, Clone, Copy)]
pub struct VectorHit {
    pub observation_id: i64,
    pub similarity: f32,
}

/// Vector index over `observation_embeddings`.
pub struct VectorIndex {
    pool: Arc<DatabasePool>,
    embedder: Option<Arc<EmbeddingClient>>,
}

impl VectorIndex {
    pub fn new(pool: Arc<DatabasePool>, embedder: Option<Arc<EmbeddingClient>>) -> Self {
        Self { pool, embedder }
    }

    /// Persist a vector for an observation, overwriting on conflict.
    pub async fn put(&self, observation_id: i64, vector: &[f32], model_tag: &str) -> Result<()> {
        let bytes = embedding_to_bytes(vector);
        let dimensions = vector.len();
        let model = model_tag.to_string();
        self.pool
            .run(move |conn| put_embedding_sync(conn, observation_id, &bytes, &model, dimensions))
            .await
    }

    /// Brute-force cosine scan over the project's embeddings.
    ///
    /// Keeps hits with similarity >= threshold, sorted descending, first
    /// `limit` returned.
    pub async fn search(
        &self,
        query_vector: &[f32],
        opts: &VectorSearchOptions,
    ) -> Result<Vec<VectorHit>> {
        let project = opts.project.clone();
        let rows = self
            .pool
            .run(move |conn| embeddings_for_project_sync(conn, project.as_deref()))
            .await?;

        let threshold = opts.threshold.unwrap_or(DEFAULT_SIMILARITY_THRESHOLD);
        let mut hits: Vec<VectorHit> = rows
            .iter()
            .map(|row| VectorHit {
                observation_id: row.observation_id,
                similarity: cosine_similarity(query_vector, &bytes_to_embedding(&row.embedding)),
            })
            .filter(|hit| hit.similarity >= threshold)
            .collect();

        hits.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(opts.limit.max(1));
        Ok(hits)
    }

    /// Embed observations that have no vector yet.
    ///
    /// Composes title + text + narrative + concepts (capped at the embed
    /// limit), embeds, persists. Per-row failures are logged and skipped;
    /// returns the count embedded.
    pub async fn backfill(&self, batch_size: usize) -> Result<usize> {
        let Some(embedder) = self.embedder.as_ref() else {
            return Ok(0);
        };

        let missing = self
            .pool
            .run(move |conn| observations_missing_embeddings_sync(conn, batch_size))
            .await?;

        if missing.is_empty() {
            return Ok(0);
        }

        let model = embedder.model_name();
        let mut embedded = 0;
        for obs in missing {
            let text = compose_embed_text(
                &obs.title,
                obs.text.as_deref(),
                obs.narrative.as_deref(),
                obs.concepts.as_deref(),
            );
            match embedder.embed(&text).await {
                Ok(vector) => {
                    self.put(obs.id, &vector, &model).await?;
                    embedded += 1;
                }
                Err(e) => {
                    tracing::debug!("Backfill embedding failed for observation {}: {}", obs.id, e);
                }
            }
        }

        if embedded > 0 {
            tracing::info!("Backfilled {} observation embeddings", embedded);
        }
        Ok(embedded)
    }

    /// Coverage counters.
    pub async fn stats(&self) -> Result<EmbeddingStats> {
        self.pool.run(embedding_stats_sync).await
    }
}

/// Text composition for embedding one observation.
pub fn compose_embed_text(
    title: &str,
    text: Option<&str>,
    narrative: Option<&str>,
    concepts: Option<&str>,
) -> String {
    let combined = [
        title,
        text.unwrap_or(""),
        narrative.unwrap_or(""),
        concepts.unwrap_or(""),
    ]
    .iter()
    .filter(|s| !s.is_empty())
    .cloned()
    .collect::<Vec<_>>()
    .join("\n");

    truncate_at_boundary(&combined, MAX_EMBED_CHARS).to_string()
}
