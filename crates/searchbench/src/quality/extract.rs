//! Extraction quality heuristics
//!
//! Scores markdown returned by an extract call on a fixed weight vector. The
//! expected-content signal only participates when the test names expected content.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

const TRUNCATION_WEIGHT: f64 = 0.20;
const MARKDOWN_WEIGHT: f64 = 0.15;
const NOISE_WEIGHT: f64 = 0.20;
const CODE_BLOCK_WEIGHT: f64 = 0.05;
const COVERAGE_WEIGHT: f64 = 0.25;
const LENGTH_WEIGHT: f64 = 0.15;

const MIN_USEFUL_LENGTH: usize = 200;
const MAX_USEFUL_LENGTH: usize = 100_000;

/// Score penalty per unbalanced markdown construct
const MARKDOWN_IMBALANCE_PENALTY: f64 = 25.0;

/// Noise keywords per 100 words that drive the noise score to zero
const MAX_NOISE_DENSITY: f64 = 5.0;

static TRUNCATION_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\.\.\.|…|\[truncated\]|\(truncated\)|\[\.\.\.\]|read more|continue reading|content truncated)\s*$")
        .expect("Truncation regex pattern is valid and should compile")
});
static NOISE_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:cookie(?:s)?|accept all|subscribe|newsletter|advertisement|sponsored|sign in|log in|sign up|privacy policy|terms of service|skip to (?:main )?content|main menu|share on (?:twitter|facebook|linkedin)|all rights reserved)\b",
    )
    .expect("Navigation/ad keyword regex pattern is valid and should compile")
});
static FENCED_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*(?:```|~~~)").expect("Fenced code regex pattern is valid and should compile"));
static INDENTED_CODE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^(?: {4}|\t)\S").expect("Indented code regex pattern is valid and should compile"));
static HEADING_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#{1,6}\s+\S").expect("Heading regex pattern is valid and should compile"));

/// Breakdown of an extraction score
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractQualityScore {
    pub overall: f64,
    pub truncation: f64,
    pub markdown: f64,
    pub noise: f64,
    pub code_blocks: f64,
    /// Share of expected phrases present; `None` when nothing was expected
    pub coverage: Option<f64>,
    pub length: f64,
}

impl ExtractQualityScore {
    fn empty(has_expected: bool) -> Self {
        Self {
            overall: 0.0,
            truncation: 0.0,
            markdown: 0.0,
            noise: 0.0,
            code_blocks: 0.0,
            coverage: has_expected.then_some(0.0),
            length: 0.0,
        }
    }
}

fn truncation_score(content: &str) -> f64 {
    if TRUNCATION_PATTERN.is_match(content.trim_end()) {
        30.0
    } else {
        100.0
    }
}

fn markdown_balance_score(content: &str) -> f64 {
    let mut imbalances = 0;

    if FENCED_CODE_PATTERN.find_iter(content).count() % 2 != 0 {
        imbalances += 1;
    }

    // Bold markers outside fenced blocks
    let prose = strip_fenced_blocks(content);
    if prose.matches("**").count() % 2 != 0 {
        imbalances += 1;
    }
    if prose.matches('[').count() != prose.matches(']').count() {
        imbalances += 1;
    }
    if prose.matches('(').count() != prose.matches(')').count() {
        imbalances += 1;
    }

    let mut score = 100.0 - MARKDOWN_IMBALANCE_PENALTY * imbalances as f64;
    if !HEADING_PATTERN.is_match(content) && content.len() > MIN_USEFUL_LENGTH * 5 {
        score -= 10.0;
    }
    score.clamp(0.0, 100.0)
}

fn strip_fenced_blocks(content: &str) -> String {
    let mut out = String::with_capacity(content.len());
    let mut in_fence = false;
    for line in content.lines() {
        let trimmed = line.trim_start();
        if trimmed.starts_with("```") || trimmed.starts_with("~~~") {
            in_fence = !in_fence;
            continue;
        }
        if !in_fence {
            out.push_str(line);
            out.push('\n');
        }
    }
    out
}

fn noise_score(content: &str) -> f64 {
    let words = content.split_whitespace().count();
    if words == 0 {
        return 0.0;
    }

    let hits = NOISE_PATTERN.find_iter(content).count();
    let density = hits as f64 * 100.0 / words as f64;
    (100.0 * (1.0 - density / MAX_NOISE_DENSITY)).clamp(0.0, 100.0)
}

fn code_block_score(content: &str) -> f64 {
    if FENCED_CODE_PATTERN.is_match(content) || INDENTED_CODE_PATTERN.is_match(content) {
        100.0
    } else {
        50.0
    }
}

fn coverage_score(content: &str, expected: &[String]) -> Option<f64> {
    let expected: Vec<&String> = expected.iter().filter(|e| !e.trim().is_empty()).collect();
    if expected.is_empty() {
        return None;
    }

    let lowered = content.to_lowercase();
    let found = expected
        .iter()
        .filter(|e| lowered.contains(&e.trim().to_lowercase()))
        .count();
    Some(found as f64 / expected.len() as f64 * 100.0)
}

fn length_score(length: usize) -> f64 {
    match length {
        0 => 0.0,
        n if n < MIN_USEFUL_LENGTH => n as f64 / MIN_USEFUL_LENGTH as f64 * 100.0,
        n if n <= MAX_USEFUL_LENGTH => 100.0,
        _ => 80.0,
    }
}

/// Score extracted `content`; `expected` lists phrases that should appear in it
pub fn score_extract_content(content: &str, expected: &[String]) -> ExtractQualityScore {
    let has_expected = expected.iter().any(|e| !e.trim().is_empty());
    if content.trim().is_empty() {
        return ExtractQualityScore::empty(has_expected);
    }

    let truncation = truncation_score(content);
    let markdown = markdown_balance_score(content);
    let noise = noise_score(content);
    let code_blocks = code_block_score(content);
    let coverage = coverage_score(content, expected);
    let length = length_score(content.chars().count());

    let mut weighted = truncation * TRUNCATION_WEIGHT
        + markdown * MARKDOWN_WEIGHT
        + noise * NOISE_WEIGHT
        + code_blocks * CODE_BLOCK_WEIGHT
        + length * LENGTH_WEIGHT;
    let mut total_weight = TRUNCATION_WEIGHT + MARKDOWN_WEIGHT + NOISE_WEIGHT + CODE_BLOCK_WEIGHT + LENGTH_WEIGHT;

    if let Some(coverage) = coverage {
        weighted += coverage * COVERAGE_WEIGHT;
        total_weight += COVERAGE_WEIGHT;
    }

    ExtractQualityScore {
        overall: (weighted / total_weight).clamp(0.0, 100.0),
        truncation,
        markdown,
        noise,
        code_blocks,
        coverage,
        length,
    }
}
