//! Crawl quality heuristics

use super::extract::score_extract_content;
use crate::types::{CrawlOptions, CrawlResponse};
use ahash::{AHashSet, RandomState};
use serde::{Deserialize, Serialize};
use std::hash::BuildHasher;

const COVERAGE_WEIGHT: f64 = 0.30;
const PAGE_QUALITY_WEIGHT: f64 = 0.35;
const CONSISTENCY_WEIGHT: f64 = 0.15;
const UNIQUENESS_WEIGHT: f64 = 0.20;

/// Characters of normalized content used as a page fingerprint
const FINGERPRINT_PREFIX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlQualityScore {
    pub overall: f64,
    /// Pages returned relative to the page budget
    pub coverage: f64,
    /// Mean extraction score of the pages
    pub page_quality: f64,
    /// Penalizes wildly varying page lengths
    pub consistency: f64,
    pub uniqueness: f64,
    /// Share of pages whose fingerprint was already seen
    pub duplicate_ratio: f64,
    pub page_count: usize,
}

fn fingerprint(state: &RandomState, content: &str) -> u64 {
    let normalized: String = content
        .split_whitespace()
        .flat_map(|w| w.chars().chain(std::iter::once(' ')))
        .take(FINGERPRINT_PREFIX_CHARS)
        .flat_map(char::to_lowercase)
        .collect();
    state.hash_one(normalized)
}

fn consistency_score(lengths: &[f64]) -> f64 {
    if lengths.len() < 2 {
        return 100.0;
    }

    let n = lengths.len() as f64;
    let mean = lengths.iter().sum::<f64>() / n;
    if mean == 0.0 {
        return 0.0;
    }
    let variance = lengths.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / n;
    let coefficient_of_variation = variance.sqrt() / mean;

    100.0 * (1.0 - coefficient_of_variation.min(1.0))
}

/// Score a crawl against the page budget in `options`
pub fn score_crawl_response(response: &CrawlResponse, options: &CrawlOptions) -> CrawlQualityScore {
    let page_count = response.pages.len();
    if page_count == 0 {
        return CrawlQualityScore {
            overall: 0.0,
            coverage: 0.0,
            page_quality: 0.0,
            consistency: 0.0,
            uniqueness: 0.0,
            duplicate_ratio: 0.0,
            page_count: 0,
        };
    }

    let coverage = match options.max_pages {
        Some(max) if max > 0 => (page_count as f64 / max as f64).min(1.0) * 100.0,
        _ => 100.0,
    };

    let page_quality = response
        .pages
        .iter()
        .map(|p| score_extract_content(&p.content, &[]).overall)
        .sum::<f64>()
        / page_count as f64;

    let lengths: Vec<f64> = response.pages.iter().map(|p| p.content.chars().count() as f64).collect();
    let consistency = consistency_score(&lengths);

    let state = RandomState::new();
    let unique: AHashSet<u64> = response
        .pages
        .iter()
        .map(|p| fingerprint(&state, &p.content))
        .collect();
    let uniqueness = unique.len() as f64 / page_count as f64 * 100.0;
    let duplicate_ratio = 1.0 - unique.len() as f64 / page_count as f64;

    let overall = coverage * COVERAGE_WEIGHT
        + page_quality * PAGE_QUALITY_WEIGHT
        + consistency * CONSISTENCY_WEIGHT
        + uniqueness * UNIQUENESS_WEIGHT;

    CrawlQualityScore {
        overall: overall.clamp(0.0, 100.0),
        coverage,
        page_quality,
        consistency,
        uniqueness,
        duplicate_ratio,
        page_count,
    }
}
