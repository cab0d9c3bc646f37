//! Composite quality scoring
//!
//! Search results are scored on six signals. Semantic similarity and reranker
//! confidence depend on external services and may be unavailable; the overall
//! score is normalized by the weights of the signals that were actually computed.
//! Extract and crawl results are scored with local heuristics only.

mod crawl;
mod embedding;
mod extract;
mod search;

pub use crawl::{CrawlQualityScore, score_crawl_response};
pub use embedding::{
    CachedEmbedder, EmbeddingRequest, EmbeddingService, HttpEmbeddingService, HttpReranker, Reranker,
    cosine_similarity,
};
pub use extract::{ExtractQualityScore, score_extract_content};
pub use search::{
    authority_score, diversity_score, domain_authority, domain_of, freshness_score, parse_published_date,
    term_overlap_score, topic_coverage_score,
};

use crate::cache::EmbeddingCache;
use crate::config::{QualityConfig, QualityWeights};
use crate::types::{CrawlOptions, CrawlResponse, SearchHit};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Breakdown of a search quality score; every component is in `[0, 100]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQualityScore {
    pub overall: f64,
    pub semantic: f64,
    pub semantic_available: bool,
    pub reranker: f64,
    pub reranker_available: bool,
    pub top_k: f64,
    pub diversity: f64,
    pub authority: f64,
    pub freshness: f64,
}

impl SearchQualityScore {
    fn empty() -> Self {
        Self {
            overall: 0.0,
            semantic: 0.0,
            semantic_available: false,
            reranker: 0.0,
            reranker_available: false,
            top_k: 0.0,
            diversity: 0.0,
            authority: 0.0,
            freshness: 0.0,
        }
    }

    /// Weighted mean of the available signals
    pub fn combine(&mut self, weights: &QualityWeights) {
        let mut signals = vec![
            (self.top_k, weights.top_k),
            (self.diversity, weights.diversity),
            (self.authority, weights.authority),
            (self.freshness, weights.freshness),
        ];
        if self.semantic_available {
            signals.push((self.semantic, weights.semantic));
        }
        if self.reranker_available {
            signals.push((self.reranker, weights.reranker));
        }

        let total_weight: f64 = signals.iter().map(|(_, w)| w).sum();
        self.overall = if total_weight > 0.0 {
            let weighted: f64 = signals.iter().map(|(s, w)| s * w).sum();
            (weighted / total_weight).clamp(0.0, 100.0)
        } else {
            0.0
        };
    }
}

/// Scores provider output; shared by every task of a run
#[derive(Clone)]
pub struct QualityScorer {
    config: QualityConfig,
    embedder: Option<CachedEmbedder>,
    reranker: Option<Arc<dyn Reranker>>,
    reference_time: Option<DateTime<Utc>>,
}

impl QualityScorer {
    /// Scorer with heuristic signals only
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] when the configured weights are invalid.
    pub fn new(config: QualityConfig) -> Result<Self> {
        config.weights.validate()?;
        Ok(Self {
            config,
            embedder: None,
            reranker: None,
            reference_time: None,
        })
    }

    /// Enable the semantic signal, caching vectors per the configured cache size and TTL
    pub fn with_embedding_service(mut self, service: Arc<dyn EmbeddingService>) -> Self {
        let cache = Arc::new(EmbeddingCache::from_config(&self.config.cache));
        self.embedder = Some(
            CachedEmbedder::new(service, cache)
                .with_options(self.config.embedding_dimensions, self.config.normalize_embeddings),
        );
        self
    }

    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Freeze "now" for freshness scoring
    pub fn with_reference_time(mut self, now: DateTime<Utc>) -> Self {
        self.reference_time = Some(now);
        self
    }

    pub fn config(&self) -> &QualityConfig {
        &self.config
    }

    /// Embedding cache backing the semantic signal, when one is configured
    pub fn embedding_cache(&self) -> Option<&Arc<EmbeddingCache>> {
        self.embedder.as_ref().map(CachedEmbedder::cache)
    }

    fn top_k(&self) -> usize {
        self.config.top_k.max(1)
    }

    async fn semantic_signal(&self, cancel: &CancellationToken, query: &str, top: &[SearchHit]) -> Result<f64> {
        let Some(embedder) = &self.embedder else {
            return Err(Error::Embedding("no embedding service configured".to_string()));
        };

        let mut texts = Vec::with_capacity(top.len() + 1);
        texts.push(query.to_string());
        texts.extend(top.iter().map(SearchHit::scoring_text));

        let vectors = embedder.embed(cancel, &texts).await?;
        let (query_vec, hit_vecs) = vectors
            .split_first()
            .ok_or_else(|| Error::Embedding("empty embedding response".to_string()))?;

        let similarities: Vec<f64> = hit_vecs
            .iter()
            .map(|v| cosine_similarity(query_vec, v).unwrap_or(0.0).max(0.0))
            .collect();
        if similarities.is_empty() {
            return Err(Error::Embedding("no result embeddings".to_string()));
        }

        Ok(similarities.iter().sum::<f64>() / similarities.len() as f64 * 100.0)
    }

    async fn reranker_signal(&self, cancel: &CancellationToken, query: &str, top: &[SearchHit]) -> Result<f64> {
        let Some(reranker) = &self.reranker else {
            return Err(Error::Embedding("no reranker configured".to_string()));
        };

        let documents: Vec<String> = top.iter().map(SearchHit::scoring_text).collect();
        let scores = reranker.rerank(cancel, query, &documents).await?;
        if scores.is_empty() {
            return Err(Error::Embedding(format!("{} returned no scores", reranker.name())));
        }

        Ok(scores.iter().map(|s| s.clamp(0.0, 1.0)).sum::<f64>() / scores.len() as f64 * 100.0)
    }

    /// Score a search result set for `query`
    ///
    /// Service failures mark the affected signal unavailable and are logged; they
    /// never fail the scoring call.
    pub async fn score_search(&self, cancel: &CancellationToken, query: &str, results: &[SearchHit]) -> SearchQualityScore {
        self.score_search_with_topics(cancel, query, &[], results).await
    }

    /// Score a search result set, crediting coverage of `expected_topics`
    ///
    /// When topics are given the top-K signal is the mean of query-term overlap and
    /// topic coverage over the leading results.
    pub async fn score_search_with_topics(
        &self,
        cancel: &CancellationToken,
        query: &str,
        expected_topics: &[String],
        results: &[SearchHit],
    ) -> SearchQualityScore {
        if results.is_empty() {
            return SearchQualityScore::empty();
        }

        let k = self.top_k();
        let top = &results[..results.len().min(k)];
        let now = self.reference_time.unwrap_or_else(Utc::now);

        let overlap = term_overlap_score(query, results, k);
        let top_k = match topic_coverage_score(expected_topics, results, k) {
            Some(coverage) => (overlap + coverage) / 2.0,
            None => overlap,
        };

        let mut score = SearchQualityScore {
            top_k,
            diversity: diversity_score(results),
            authority: authority_score(results, k),
            freshness: freshness_score(results, k, now),
            ..SearchQualityScore::empty()
        };

        let (semantic, reranker) = tokio::join!(
            async {
                match self.embedder {
                    Some(_) => Some(self.semantic_signal(cancel, query, top).await),
                    None => None,
                }
            },
            async {
                match self.reranker {
                    Some(_) => Some(self.reranker_signal(cancel, query, top).await),
                    None => None,
                }
            }
        );

        match semantic {
            Some(Ok(value)) => {
                score.semantic = value;
                score.semantic_available = true;
            }
            Some(Err(err)) => warn!(error = %err, "semantic scoring unavailable"),
            None => {}
        }
        match reranker {
            Some(Ok(value)) => {
                score.reranker = value;
                score.reranker_available = true;
            }
            Some(Err(err)) => warn!(error = %err, "reranker scoring unavailable"),
            None => {}
        }

        score.combine(&self.config.weights);
        score
    }

    /// Score extracted content; the url is only used for logging
    pub fn score_extract(&self, content: &str, url: &str, expected: &[String]) -> ExtractQualityScore {
        let score = score_extract_content(content, expected);
        tracing::trace!(url, overall = score.overall, "scored extraction");
        score
    }

    pub fn score_crawl(&self, response: &CrawlResponse, options: &CrawlOptions) -> CrawlQualityScore {
        score_crawl_response(response, options)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockEmbeddingService, MockReranker};
    use chrono::TimeZone;

    fn hits() -> Vec<SearchHit> {
        vec![
            SearchHit::new("Tokio tutorial", "https://tokio.rs/tokio/tutorial", "Learn async rust with tokio"),
            SearchHit::new("Tokio docs", "https://docs.rs/tokio", "Tokio API reference"),
            SearchHit::new("Async book", "https://rust-lang.github.io/async-book", "Async programming in rust"),
        ]
    }

    fn scorer() -> QualityScorer {
        QualityScorer::new(QualityConfig::default())
            .unwrap()
            .with_reference_time(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn test_unavailable_signals_are_excluded() {
        let cancel = CancellationToken::new();
        let score = scorer().score_search(&cancel, "async rust tokio", &hits()).await;

        assert!(!score.semantic_available);
        assert!(!score.reranker_available);

        let weights = QualityWeights::default();
        let expected = (score.top_k * weights.top_k
            + score.diversity * weights.diversity
            + score.authority * weights.authority
            + score.freshness * weights.freshness)
            / (weights.top_k + weights.diversity + weights.authority + weights.freshness);
        assert!((score.overall - expected).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_expected_topics_shift_top_k() {
        let cancel = CancellationToken::new();
        let scorer = scorer();
        let plain = scorer.score_search(&cancel, "async rust tokio", &hits()).await;

        let covered = vec!["tutorial".to_string(), "api reference".to_string()];
        let with_covered = scorer
            .score_search_with_topics(&cancel, "async rust tokio", &covered, &hits())
            .await;
        let expected = (plain.top_k + 100.0) / 2.0;
        assert!((with_covered.top_k - expected).abs() < 1e-9);

        let missing = vec!["webassembly".to_string()];
        let with_missing = scorer
            .score_search_with_topics(&cancel, "async rust tokio", &missing, &hits())
            .await;
        assert!((with_missing.top_k - plain.top_k / 2.0).abs() < 1e-9);
        assert!(with_missing.overall < with_covered.overall);
        assert_eq!(with_missing.diversity, plain.diversity);
    }

    #[tokio::test]
    async fn test_all_signals_available() {
        let cancel = CancellationToken::new();
        let scorer = scorer()
            .with_embedding_service(Arc::new(MockEmbeddingService::new(16)))
            .with_reranker(Arc::new(MockReranker::constant(0.8)));

        let score = scorer.score_search(&cancel, "async rust tokio", &hits()).await;
        assert!(score.semantic_available);
        assert!(score.reranker_available);
        assert!((score.reranker - 80.0).abs() < 1e-9);
        assert!((0.0..=100.0).contains(&score.semantic));
        assert!((0.0..=100.0).contains(&score.overall));
    }

    #[tokio::test]
    async fn test_failing_service_degrades_not_fails() {
        let cancel = CancellationToken::new();
        let scorer = scorer()
            .with_embedding_service(Arc::new(MockEmbeddingService::failing()))
            .with_reranker(Arc::new(MockReranker::constant(1.0)));

        let score = scorer.score_search(&cancel, "async rust", &hits()).await;
        assert!(!score.semantic_available);
        assert!(score.reranker_available);
        assert!(score.overall > 0.0);
    }

    #[tokio::test]
    async fn test_semantic_vectors_are_cached() {
        let cancel = CancellationToken::new();
        let service = Arc::new(MockEmbeddingService::new(8));
        let scorer = scorer().with_embedding_service(service.clone());

        scorer.score_search(&cancel, "async rust", &hits()).await;
        scorer.score_search(&cancel, "async rust", &hits()).await;

        assert_eq!(service.call_count(), 1);
        let stats = scorer.embedding_cache().unwrap().stats();
        assert_eq!(stats.hits, 4);
    }

    #[tokio::test]
    async fn test_empty_results_score_zero() {
        let cancel = CancellationToken::new();
        let score = scorer().score_search(&cancel, "anything", &[]).await;
        assert_eq!(score.overall, 0.0);
        assert!(!score.semantic_available);
    }

    #[test]
    fn test_combine_with_zero_weight_signals() {
        let mut score = SearchQualityScore {
            top_k: 100.0,
            semantic: 0.0,
            semantic_available: true,
            ..SearchQualityScore::empty()
        };
        let weights = QualityWeights {
            semantic: 1.0,
            reranker: 1.0,
            top_k: 1.0,
            diversity: 0.0,
            authority: 0.0,
            freshness: 0.0,
        };
        score.combine(&weights);
        // reranker unavailable, so only semantic and top_k count
        assert!((score.overall - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let config = QualityConfig {
            weights: QualityWeights {
                authority: -0.1,
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(QualityScorer::new(config).is_err());
    }
}
