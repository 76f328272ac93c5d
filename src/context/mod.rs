// src/context/mod.rs
// Smart-context assembly: score candidates, pack greedily under a token
// budget, attach recent summaries

use crate::db::observations::recent_observations_sync;
use crate::db::pool::DatabasePool;
use crate::db::sessions::recent_summaries_sync;
use crate::db::types::{is_knowledge_type, Observation, Summary};
use crate::error::Result;
use crate::search::{
    composite_score, Bm25Normalizer, HybridSearchOptions, HybridSearcher, ScoreSignals,
    CONTEXT_WEIGHTS,
};
use std::sync::Arc;

/// Candidates considered per request.
const CANDIDATE_LIMIT: usize = 30;

/// Summaries attached to every context response.
const SUMMARY_LIMIT: usize = 5;

/// Default token budget when the caller does not supply one.
pub const DEFAULT_TOKEN_BUDGET: i64 = 2000;

/// Options for smart-context assembly.
#[derive(Debug, Clone)]
pub struct SmartContextOptions {
    pub project: String,
    pub query: Option<String>,
    pub token_budget: i64,
}

/// One packed context item.
#[derive(Debug, Clone)]
pub struct ContextItem {
    pub observation: Observation,
    pub score: f64,
    pub tokens: i64,
}

/// Assembled context.
#[derive(Debug, Clone)]
pub struct SmartContext {
    pub items: Vec<ContextItem>,
    pub summaries: Vec<Summary>,
    pub token_estimate: i64,
}

/// Contexter over one pool + hybrid searcher.
pub struct Contexter {
    pool: Arc<DatabasePool>,
    searcher: Arc<HybridSearcher>,
}

/// Token cost of one observation in the packer:
/// ceil((len(title) + len(content)) / 4).
fn item_tokens(obs: &Observation) -> i64 {
    let content = obs
        .text
        .as_deref()
        .or(obs.narrative.as_deref())
        .unwrap_or("");
    ((obs.title.len() + content.len()) as i64 + 3) / 4
}

/// Greedy packer: take items in the given (score-ordered) sequence until
/// the next one would exceed the budget.
fn pack(candidates: Vec<(Observation, f64)>, budget: i64) -> (Vec<ContextItem>, i64) {
    let mut items = Vec::new();
    let mut used = 0i64;
    for (observation, score) in candidates {
        let tokens = item_tokens(&observation);
        if used + tokens > budget {
            break;
        }
        used += tokens;
        items.push(ContextItem {
            observation,
            score,
            tokens,
        });
    }
    (items, used)
}

impl Contexter {
    pub fn new(pool: Arc<DatabasePool>, searcher: Arc<HybridSearcher>) -> Self {
        Self { pool, searcher }
    }

    /// Assemble context for a project.
    ///
    /// With a query: hybrid search supplies the candidates and their scores.
    /// Without: the most recent observations are scored on recency and
    /// project match only, knowledge types first.
    pub async fn get_smart_context(&self, opts: &SmartContextOptions) -> Result<SmartContext> {
        let budget = if opts.token_budget > 0 {
            opts.token_budget
        } else {
            DEFAULT_TOKEN_BUDGET
        };

        let candidates: Vec<(Observation, f64)> = match opts.query.as_deref() {
            Some(query) if !query.trim().is_empty() => {
                let hits = self
                    .searcher
                    .search(
                        query,
                        &HybridSearchOptions {
                            project: Some(opts.project.clone()),
                            limit: CANDIDATE_LIMIT,
                        },
                    )
                    .await?;
                hits.into_iter().map(|h| (h.observation, h.score)).collect()
            }
            _ => {
                let project = opts.project.clone();
                let recent = self
                    .pool
                    .run(move |conn| recent_observations_sync(conn, &project, CANDIDATE_LIMIT))
                    .await?;

                let normalizer = Bm25Normalizer::from_ranks([]);
                let now_ms = chrono::Utc::now().timestamp_millis();
                let scored = |obs: &Observation| {
                    composite_score(
                        &ScoreSignals {
                            semantic: 0.0,
                            fts_rank: None,
                            created_at_epoch: obs.created_at_epoch,
                            candidate_project: &obs.project,
                            query_project: Some(&opts.project),
                            obs_type: &obs.obs_type,
                        },
                        &CONTEXT_WEIGHTS,
                        &normalizer,
                        now_ms,
                    )
                };

                let mut knowledge: Vec<(Observation, f64)> = Vec::new();
                let mut activity: Vec<(Observation, f64)> = Vec::new();
                for obs in recent {
                    let score = scored(&obs);
                    if is_knowledge_type(&obs.obs_type) {
                        knowledge.push((obs, score));
                    } else {
                        activity.push((obs, score));
                    }
                }
                let by_score = |a: &(Observation, f64), b: &(Observation, f64)| {
                    b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                };
                knowledge.sort_by(by_score);
                activity.sort_by(by_score);

                // Knowledge first: durable records beat activity noise
                knowledge.into_iter().chain(activity).collect()
            }
        };

        let (items, token_estimate) = pack(candidates, budget);

        let project = opts.project.clone();
        let summaries = self
            .pool
            .run(move |conn| recent_summaries_sync(conn, &project, SUMMARY_LIMIT))
            .await?;

        Ok(SmartContext {
            items,
            summaries,
            token_estimate,
        })
    }
}
