// src/search/hybrid.rs
// Hybrid retrieval: fan out to the vector and lexical backends, merge by
// observation id, score with the search weight profile

use crate::db::observations::{observations_by_ids_sync, update_last_accessed_sync};
use crate::db::pool::DatabasePool;
use crate::db::search::{search_lexical_with_rank_sync, SearchFilters};
use crate::db::types::Observation;
use crate::embeddings::EmbeddingClient;
use crate::error::Result;
use crate::search::scorer::{composite_score, Bm25Normalizer, ScoreSignals, SEARCH_WEIGHTS};
use crate::search::vector::{VectorIndex, VectorSearchOptions, DEFAULT_SIMILARITY_THRESHOLD};
use std::collections::HashMap;
use std::sync::Arc;

/// Which backend(s) produced a hit, for observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchSource {
    Vector,
    Keyword,
    Hybrid,
}

impl std::fmt::Display for SearchSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SearchSource::Vector => write!(f, "vector"),
            SearchSource::Keyword => write!(f, "keyword"),
            SearchSource::Hybrid => write!(f, "hybrid"),
        }
    }
}

/// Options for a hybrid search.
#[derive(Debug, Clone, Default)]
pub struct HybridSearchOptions {
    pub project: Option<String>,
    pub limit: usize,
}

/// One scored hit.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub observation: Observation,
    pub score: f64,
    pub semantic: f64,
    pub fts_rank: Option<f64>,
    pub source: SearchSource,
}

/// Merged candidate before scoring.
struct Candidate {
    semantic: f64,
    fts_rank: Option<f64>,
    observation: Option<Observation>,
}

/// Hybrid searcher over one pool + vector index.
pub struct HybridSearcher {
    pool: Arc<DatabasePool>,
    vector: Arc<VectorIndex>,
    embedder: Option<Arc<EmbeddingClient>>,
}

impl HybridSearcher {
    pub fn new(
        pool: Arc<DatabasePool>,
        vector: Arc<VectorIndex>,
        embedder: Option<Arc<EmbeddingClient>>,
    ) -> Self {
        Self {
            pool,
            vector,
            embedder,
        }
    }

    /// Full hybrid search: embed the query when a provider is available,
    /// then merge vector and lexical candidates.
    ///
    /// Embedding failures are swallowed (the lexical half still answers).
    pub async fn search(&self, query: &str, opts: &HybridSearchOptions) -> Result<Vec<SearchHit>> {
        let query_vector = match self.embedder.as_ref() {
            Some(embedder) => match embedder.embed(query).await {
                Ok(vector) => Some(vector),
                Err(e) => {
                    tracing::debug!("Query embedding failed, lexical-only search: {}", e);
                    None
                }
            },
            None => None,
        };
        self.search_with_vector(query_vector.as_deref(), query, opts)
            .await
    }

    /// Hybrid search with a pre-computed query vector (None = lexical only).
    pub async fn search_with_vector(
        &self,
        query_vector: Option<&[f32]>,
        query: &str,
        opts: &HybridSearchOptions,
    ) -> Result<Vec<SearchHit>> {
        let limit = opts.limit.max(1);
        let overfetch = limit * 2;

        let mut candidates: HashMap<i64, Candidate> = HashMap::new();

        if let Some(vector) = query_vector {
            let hits = self
                .vector
                .search(
                    vector,
                    &VectorSearchOptions {
                        project: opts.project.clone(),
                        limit: overfetch,
                        threshold: Some(DEFAULT_SIMILARITY_THRESHOLD),
                    },
                )
                .await?;
            for hit in hits {
                candidates.insert(
                    hit.observation_id,
                    Candidate {
                        semantic: hit.similarity as f64,
                        fts_rank: None,
                        observation: None,
                    },
                );
            }
        }

        let filters = SearchFilters {
            project: opts.project.clone(),
            limit: overfetch,
            ..Default::default()
        };
        let query_owned = query.to_string();
        let lexical = self
            .pool
            .run(move |conn| search_lexical_with_rank_sync(conn, &query_owned, &filters))
            .await?;

        let mut ranks: Vec<f64> = Vec::with_capacity(lexical.len());
        for hit in lexical {
            if let Some(rank) = hit.rank {
                ranks.push(rank);
            }
            let entry = candidates.entry(hit.observation.id).or_insert(Candidate {
                semantic: 0.0,
                fts_rank: None,
                observation: None,
            });
            entry.fts_rank = hit.rank;
            entry.observation = Some(hit.observation);
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        // Vector-only hits still need their rows
        let missing: Vec<i64> = candidates
            .iter()
            .filter(|(_, c)| c.observation.is_none())
            .map(|(id, _)| *id)
            .collect();
        if !missing.is_empty() {
            let fetched = self
                .pool
                .run(move |conn| observations_by_ids_sync(conn, &missing))
                .await?;
            for obs in fetched {
                if let Some(entry) = candidates.get_mut(&obs.id) {
                    entry.observation = Some(obs);
                }
            }
        }

        let normalizer = Bm25Normalizer::from_ranks(ranks);
        let now_ms = chrono::Utc::now().timestamp_millis();

        let mut hits: Vec<SearchHit> = candidates
            .into_values()
            .filter_map(|candidate| {
                let observation = candidate.observation?;
                let score = composite_score(
                    &ScoreSignals {
                        semantic: candidate.semantic,
                        fts_rank: candidate.fts_rank,
                        created_at_epoch: observation.created_at_epoch,
                        candidate_project: &observation.project,
                        query_project: opts.project.as_deref(),
                        obs_type: &observation.obs_type,
                    },
                    &SEARCH_WEIGHTS,
                    &normalizer,
                    now_ms,
                );
                let source = match (candidate.semantic > 0.0, candidate.fts_rank.is_some()) {
                    (true, true) => SearchSource::Hybrid,
                    (true, false) => SearchSource::Vector,
                    _ => SearchSource::Keyword,
                };
                Some(SearchHit {
                    observation,
                    score,
                    semantic: candidate.semantic,
                    fts_rank: candidate.fts_rank,
                    source,
                })
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.observation.id.cmp(&a.observation.id))
        });
        hits.truncate(limit);

        // Best-effort access tracking; a failure here must not fail the search
        let ids: Vec<i64> = hits.iter().map(|h| h.observation.id).collect();
        self.pool
            .try_interact("search access tracking", move |conn| {
                update_last_accessed_sync(conn, &ids).map_err(Into::into)
            })
            .await;

        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::{get_observation_sync, store_observation_sync, NewObservation};

    async fn setup() -> (Arc<DatabasePool>, HybridSearcher) {
        let pool = Arc::new(DatabasePool::open_in_memory().await.unwrap());
        let vector = Arc::new(VectorIndex::new(pool.clone(), None));
        let searcher = HybridSearcher::new(pool.clone(), vector, None);
        (pool, searcher)
    }

    async fn store(pool: &Arc<DatabasePool>, title: &str, text: &str) -> i64 {
        let title = title.to_string();
        let text = text.to_string();
        pool.run(move |conn| {
            store_observation_sync(
                conn,
                NewObservation {
                    session_id: "s1".to_string(),
                    project: "p1".to_string(),
                    obs_type: "research".to_string(),
                    title,
                    text: Some(text),
                    ..Default::default()
                },
            )
        })
        .await
        .unwrap()
    }

    fn opts(limit: usize) -> HybridSearchOptions {
        HybridSearchOptions {
            project: Some("p1".to_string()),
            limit,
        }
    }

    #[tokio::test]
    async fn test_lexical_only_search() {
        let (pool, searcher) = setup().await;
        store(&pool, "tokio runtime tuning", "worker threads").await;
        store(&pool, "unrelated entry", "nothing here").await;

        let hits = searcher.search("tokio", &opts(10)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, SearchSource::Keyword);
        assert!(hits[0].fts_rank.is_some());
        assert_eq!(hits[0].semantic, 0.0);
    }

    #[tokio::test]
    async fn test_empty_pools_return_empty() {
        let (_pool, searcher) = setup().await;
        let hits = searcher.search("anything", &opts(10)).await.unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_vector_and_lexical_merge_to_hybrid() {
        let (pool, searcher) = setup().await;
        let id = store(&pool, "tokio runtime tuning", "worker threads").await;
        searcher.vector.put(id, &[1.0, 0.0], "m").await.unwrap();

        let hits = searcher
            .search_with_vector(Some(&[1.0, 0.0]), "tokio", &opts(10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, SearchSource::Hybrid);
        assert!((hits[0].semantic - 1.0).abs() < 1e-6);
        assert!(hits[0].fts_rank.is_some());
    }

    #[tokio::test]
    async fn test_vector_only_hit_fetches_row() {
        let (pool, searcher) = setup().await;
        let id = store(&pool, "completely different words", "nothing matching").await;
        searcher.vector.put(id, &[1.0, 0.0], "m").await.unwrap();

        let hits = searcher
            .search_with_vector(Some(&[1.0, 0.0]), "tokio", &opts(10))
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].source, SearchSource::Vector);
        assert_eq!(hits[0].observation.id, id);
    }

    #[tokio::test]
    async fn test_search_touches_access_time() {
        let (pool, searcher) = setup().await;
        let id = store(&pool, "tokio runtime tuning", "").await;

        searcher.search("tokio", &opts(10)).await.unwrap();

        let stored = pool
            .run(move |conn| get_observation_sync(conn, id))
            .await
            .unwrap()
            .unwrap();
        assert!(stored.last_accessed_epoch.is_some());
    }

    #[tokio::test]
    async fn test_limit_applies_after_merge() {
        let (pool, searcher) = setup().await;
        for i in 0..5 {
            store(&pool, &format!("tokio note {i}"), "").await;
        }
        let hits = searcher.search("tokio", &opts(2)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits[0].score >= hits[1].score);
    }

    #[tokio::test]
    async fn test_knowledge_hit_outranks_plain_hit() {
        let (pool, searcher) = setup().await;
        // Identical titles so both carry the same BM25 rank; only the
        // knowledge-type boost separates them.
        store(&pool, "tokio notes", "").await;
        let constraint_id = pool
            .run(|conn| {
                store_observation_sync(
                    conn,
                    NewObservation {
                        session_id: "s1".to_string(),
                        project: "p1".to_string(),
                        obs_type: "constraint".to_string(),
                        title: "tokio notes".to_string(),
                        ..Default::default()
                    },
                )
            })
            .await
            .unwrap();

        let hits = searcher.search("tokio notes", &opts(10)).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].observation.id, constraint_id);
    }
}
