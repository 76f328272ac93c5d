// src/search/mod.rs
// Retrieval: vector index, composite scoring, and the hybrid searcher

mod hybrid;
mod scorer;
mod utils;
mod vector;

pub use hybrid::{HybridSearchOptions, HybridSearcher, SearchHit, SearchSource};
pub use scorer::{
    composite_score, knowledge_boost, project_match_score, recency_score, Bm25Normalizer,
    ScoreSignals, ScoreWeights, CONTEXT_WEIGHTS, HALF_LIFE_HOURS, HYBRID_BOOST, SEARCH_WEIGHTS,
};
pub use utils::{bytes_to_embedding, cosine_similarity, embedding_to_bytes};
pub use vector::{
    compose_embed_text, VectorHit, VectorIndex, VectorSearchOptions,
    DEFAULT_SIMILARITY_THRESHOLD,
};
