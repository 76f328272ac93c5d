// src/search/scorer.rs
// Composite relevance scoring: BM25 normalization, recency decay, project
// match, weight profiles, and multiplicative boosts

/// Recency half-life: the recency signal decays to 0.5 after one week.
pub const HALF_LIFE_HOURS: f64 = 168.0;

/// Multiplier applied when both retrieval backends agreed on a candidate.
pub const HYBRID_BOOST: f64 = 1.15;

/// Signal weights for one scoring profile.
#[derive(Debug, Clone, Copy)]
pub struct ScoreWeights {
    pub semantic: f64,
    pub fts: f64,
    pub recency: f64,
    pub project: f64,
}

/// Weights when a query is present.
pub const SEARCH_WEIGHTS: ScoreWeights = ScoreWeights {
    semantic: 0.40,
    fts: 0.30,
    recency: 0.20,
    project: 0.10,
};

/// Weights for query-less context assembly: recency and project only.
pub const CONTEXT_WEIGHTS: ScoreWeights = ScoreWeights {
    semantic: 0.0,
    fts: 0.0,
    recency: 0.70,
    project: 0.30,
};

/// Per-query BM25 normalizer over the candidate pool's raw ranks.
///
/// BM25 ranks ascend with irrelevance (lower is better), so normalization
/// maps the best candidate to 1 and the worst to 0. An empty pool scores 0
/// and a single-element pool scores 1.
#[derive(Debug, Clone, Copy)]
pub struct Bm25Normalizer {
    min: f64,
    max: f64,
    count: usize,
}

impl Bm25Normalizer {
    /// Build from the raw ranks present in the candidate pool.
    pub fn from_ranks<I: IntoIterator<Item = f64>>(ranks: I) -> Self {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut count = 0;
        for rank in ranks {
            min = min.min(rank);
            max = max.max(rank);
            count += 1;
        }
        Self { min, max, count }
    }

    /// Normalize one raw rank into [0, 1].
    pub fn score(&self, rank: f64) -> f64 {
        match self.count {
            0 => 0.0,
            1 => 1.0,
            _ => {
                if (self.max - self.min).abs() < f64::EPSILON {
                    1.0
                } else {
                    ((self.max - rank) / (self.max - self.min)).clamp(0.0, 1.0)
                }
            }
        }
    }
}

/// Exponential recency decay with a one-week half-life.
///
/// Negative age (clock skew) clamps to 1; missing or non-positive epochs
/// yield 0.
pub fn recency_score(created_at_epoch: i64, now_ms: i64) -> f64 {
    if created_at_epoch <= 0 {
        return 0.0;
    }
    let age_hours = (now_ms - created_at_epoch) as f64 / 3_600_000.0;
    if age_hours < 0.0 {
        return 1.0;
    }
    (-age_hours * std::f64::consts::LN_2 / HALF_LIFE_HOURS).exp()
}

/// 1 when the candidate's project equals the query project
/// (case-insensitive), 0 otherwise or when either side is empty.
pub fn project_match_score(candidate_project: &str, query_project: Option<&str>) -> f64 {
    match query_project {
        Some(query) if !query.is_empty() && !candidate_project.is_empty() => {
            if candidate_project.eq_ignore_ascii_case(query) {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    }
}

/// Multiplier for knowledge types; durable records outrank activity noise.
pub fn knowledge_boost(obs_type: &str) -> f64 {
    match obs_type {
        "constraint" => 1.30,
        "decision" => 1.25,
        "heuristic" => 1.15,
        "rejected" => 1.10,
        _ => 1.0,
    }
}

/// Raw per-candidate signals feeding one composite score.
#[derive(Debug, Clone, Copy)]
pub struct ScoreSignals<'a> {
    /// Cosine similarity from the vector scan; 0 when absent.
    pub semantic: f64,
    /// Raw BM25 rank when the lexical backend returned the candidate.
    pub fts_rank: Option<f64>,
    pub created_at_epoch: i64,
    pub candidate_project: &'a str,
    pub query_project: Option<&'a str>,
    pub obs_type: &'a str,
}

/// Weighted sum of the four signals, then the hybrid boost (both backends
/// agreed), then the knowledge-type boost, clamped to [0, 1].
pub fn composite_score(
    signals: &ScoreSignals,
    weights: &ScoreWeights,
    normalizer: &Bm25Normalizer,
    now_ms: i64,
) -> f64 {
    let fts = signals.fts_rank.map(|r| normalizer.score(r)).unwrap_or(0.0);
    let recency = recency_score(signals.created_at_epoch, now_ms);
    let project = project_match_score(signals.candidate_project, signals.query_project);

    let mut score = weights.semantic * signals.semantic
        + weights.fts * fts
        + weights.recency * recency
        + weights.project * project;

    if signals.semantic > 0.0 && signals.fts_rank.is_some() {
        score *= HYBRID_BOOST;
    }
    score *= knowledge_boost(signals.obs_type);

    score.clamp(0.0, 1.0)
}

#[cfg(test)]
mod recency_tests {
    use super::*;

    const HOUR_MS: i64 = 3_600_000;

    #[test]
    fn test_recency_now_is_one() {
        let now = 1_700_000_000_000;
        assert!((recency_score(now, now) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_recency_half_life() {
        let now = 1_700_000_000_000;
        let week_old = now - 168 * HOUR_MS;
        assert!((recency_score(week_old, now) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_recency_two_half_lives() {
        let now = 1_700_000_000_000;
        let two_weeks_old = now - 336 * HOUR_MS;
        assert!((recency_score(two_weeks_old, now) - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_recency_future_clamps_to_one() {
        let now = 1_700_000_000_000;
        assert!((recency_score(now + HOUR_MS, now) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_recency_invalid_epoch_is_zero() {
        let now = 1_700_000_000_000;
        assert_eq!(recency_score(0, now), 0.0);
        assert_eq!(recency_score(-5, now), 0.0);
    }
}

#[cfg(test)]
mod bm25_tests {
    use super::*;

    #[test]
    fn test_empty_pool_scores_zero() {
        let n = Bm25Normalizer::from_ranks([]);
        assert_eq!(n.score(-3.0), 0.0);
    }

    #[test]
    fn test_single_element_scores_one() {
        let n = Bm25Normalizer::from_ranks([-4.2]);
        assert_eq!(n.score(-4.2), 1.0);
    }

    #[test]
    fn test_best_maps_to_one_worst_to_zero() {
        // BM25 is ascending-worse: -8 is the best rank here
        let n = Bm25Normalizer::from_ranks([-8.0, -5.0, -1.0]);
        assert!((n.score(-8.0) - 1.0).abs() < 1e-12);
        assert!((n.score(-1.0) - 0.0).abs() < 1e-12);
        let mid = n.score(-5.0);
        assert!(mid > 0.0 && mid < 1.0);
    }

    #[test]
    fn test_identical_ranks_score_one() {
        let n = Bm25Normalizer::from_ranks([-2.0, -2.0, -2.0]);
        assert_eq!(n.score(-2.0), 1.0);
    }
}

#[cfg(test)]
mod score_tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;
    const HOUR_MS: i64 = 3_600_000;

    fn signals<'a>(semantic: f64, rank: Option<f64>, epoch: i64, obs_type: &'a str) -> ScoreSignals<'a> {
        ScoreSignals {
            semantic,
            fts_rank: rank,
            created_at_epoch: epoch,
            candidate_project: "p1",
            query_project: Some("p1"),
            obs_type,
        }
    }

    #[test]
    fn test_project_match() {
        assert_eq!(project_match_score("p1", Some("p1")), 1.0);
        assert_eq!(project_match_score("P1", Some("p1")), 1.0);
        assert_eq!(project_match_score("p1", Some("p2")), 0.0);
        assert_eq!(project_match_score("p1", None), 0.0);
        assert_eq!(project_match_score("", Some("p1")), 0.0);
        assert_eq!(project_match_score("p1", Some("")), 0.0);
    }

    #[test]
    fn test_knowledge_boosts() {
        assert!((knowledge_boost("constraint") - 1.30).abs() < 1e-12);
        assert!((knowledge_boost("decision") - 1.25).abs() < 1e-12);
        assert!((knowledge_boost("heuristic") - 1.15).abs() < 1e-12);
        assert!((knowledge_boost("rejected") - 1.10).abs() < 1e-12);
        assert!((knowledge_boost("command") - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_score_always_in_unit_interval() {
        let normalizer = Bm25Normalizer::from_ranks([-8.0, -1.0]);
        let cases = [
            signals(1.0, Some(-8.0), NOW, "constraint"),
            signals(0.0, None, 0, "command"),
            signals(1.0, Some(-8.0), NOW + HOUR_MS, "decision"),
            signals(0.5, Some(-1.0), NOW - 1000 * HOUR_MS, "heuristic"),
        ];
        for s in cases {
            let score = composite_score(&s, &SEARCH_WEIGHTS, &normalizer, NOW);
            assert!((0.0..=1.0).contains(&score), "score {score} out of bounds");
        }
    }

    #[test]
    fn test_fresh_beats_stale_at_equal_rank() {
        // Two candidates with identical BM25 rank: the fresh one must rank
        // strictly higher under search weights.
        let normalizer = Bm25Normalizer::from_ranks([-5.0, -5.0]);
        let fresh = composite_score(
            &signals(0.0, Some(-5.0), NOW, "command"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        let stale = composite_score(
            &signals(0.0, Some(-5.0), NOW - 168 * HOUR_MS, "command"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        assert!(fresh > stale);
    }

    #[test]
    fn test_hybrid_boost_applies_only_with_both_backends() {
        let normalizer = Bm25Normalizer::from_ranks([-5.0]);
        let both = composite_score(
            &signals(0.5, Some(-5.0), NOW, "command"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        let semantic_only = composite_score(
            &signals(0.5, None, NOW, "command"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        // both = (0.4*0.5 + 0.3*1 + 0.2 + 0.1) * 1.15; semantic_only lacks
        // the fts term and the boost
        assert!(both > semantic_only);

        let expected_both = (0.4 * 0.5 + 0.3 + 0.2 + 0.1) * HYBRID_BOOST;
        assert!((both - expected_both.clamp(0.0, 1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_knowledge_type_outranks_plain_at_equal_signals() {
        let normalizer = Bm25Normalizer::from_ranks([-5.0, -5.0]);
        let constraint = composite_score(
            &signals(0.3, Some(-5.0), NOW, "constraint"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        let plain = composite_score(
            &signals(0.3, Some(-5.0), NOW, "file-read"),
            &SEARCH_WEIGHTS,
            &normalizer,
            NOW,
        );
        assert!(constraint > plain);
    }

    #[test]
    fn test_context_weights_ignore_query_signals() {
        let normalizer = Bm25Normalizer::from_ranks([]);
        let with_semantic = composite_score(
            &signals(1.0, None, NOW, "command"),
            &CONTEXT_WEIGHTS,
            &normalizer,
            NOW,
        );
        let without_semantic = composite_score(
            &signals(0.0, None, NOW, "command"),
            &CONTEXT_WEIGHTS,
            &normalizer,
            NOW,
        );
        assert!((with_semantic - without_semantic).abs() < 1e-12);
        // recency 1.0 and project match 1.0: 0.7 + 0.3 = 1.0
        assert!((with_semantic - 1.0).abs() < 1e-12);
    }
}
