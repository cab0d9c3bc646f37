//! Heuristic sub-scores for search result sets
//!
//! Each function returns a value in `[0, 100]`.

use crate::types::SearchHit;
use ahash::AHashMap;
use chrono::{DateTime, NaiveDate, Utc};

/// Reputation of well-known hosts, matched on the registrable suffix
const AUTHORITY_TABLE: &[(&str, f64)] = &[
    ("wikipedia.org", 95.0),
    ("github.com", 90.0),
    ("docs.rs", 90.0),
    ("arxiv.org", 90.0),
    ("developer.mozilla.org", 90.0),
    ("rust-lang.org", 90.0),
    ("python.org", 85.0),
    ("stackoverflow.com", 85.0),
    ("nature.com", 85.0),
    ("medium.com", 60.0),
    ("reddit.com", 55.0),
    ("quora.com", 45.0),
    ("pinterest.com", 30.0),
];

/// Score for unlisted hosts
const DEFAULT_AUTHORITY: f64 = 50.0;
const GOV_AUTHORITY: f64 = 90.0;
const EDU_AUTHORITY: f64 = 85.0;

/// Score for results without a parseable publication date
const UNKNOWN_FRESHNESS: f64 = 50.0;

/// Age buckets in days and their scores; anything older scores `STALE_FRESHNESS`
const FRESHNESS_BUCKETS: &[(i64, f64)] = &[(30, 100.0), (180, 80.0), (365, 60.0), (3 * 365, 40.0)];
const STALE_FRESHNESS: f64 = 20.0;

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "how", "in", "is", "it", "of", "on", "or",
    "that", "the", "to", "what", "when", "where", "which", "who", "why", "with",
];

/// Host of `url` without a leading `www.`
pub fn domain_of(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_lowercase();
    Some(host.strip_prefix("www.").map(str::to_string).unwrap_or(host))
}

fn query_terms(query: &str) -> Vec<String> {
    let mut terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 1)
        .map(str::to_lowercase)
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect();
    terms.sort();
    terms.dedup();
    terms
}

/// Mean fraction of query terms found in each of the leading `k` results
pub fn term_overlap_score(query: &str, hits: &[SearchHit], k: usize) -> f64 {
    let terms = query_terms(query);
    let top: Vec<&SearchHit> = hits.iter().take(k.max(1)).collect();
    if terms.is_empty() || top.is_empty() {
        return 0.0;
    }

    let total: f64 = top
        .iter()
        .map(|hit| {
            let haystack = format!("{} {} {}", hit.title, hit.snippet, hit.url).to_lowercase();
            let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
            found as f64 / terms.len() as f64
        })
        .sum();

    total / top.len() as f64 * 100.0
}

/// Percentage of `topics` mentioned anywhere in the leading `k` results
///
/// `None` when no topics are expected.
pub fn topic_coverage_score(topics: &[String], hits: &[SearchHit], k: usize) -> Option<f64> {
    let topics: Vec<String> = topics
        .iter()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if topics.is_empty() {
        return None;
    }

    let haystack = hits
        .iter()
        .take(k.max(1))
        .map(|hit| format!("{} {} {}", hit.title, hit.snippet, hit.url))
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    let covered = topics.iter().filter(|t| haystack.contains(t.as_str())).count();
    Some(covered as f64 / topics.len() as f64 * 100.0)
}

/// Shannon entropy of the domain distribution, normalized by its maximum
///
/// An empty set scores 0 and a single result 100. Otherwise all results on one
/// domain score 0 and every result on its own domain scores 100.
pub fn diversity_score(hits: &[SearchHit]) -> f64 {
    match hits.len() {
        0 => return 0.0,
        1 => return 100.0,
        _ => {}
    }

    let mut counts: AHashMap<String, usize> = AHashMap::new();
    for hit in hits {
        let domain = domain_of(&hit.url).unwrap_or_else(|| hit.url.clone());
        *counts.entry(domain).or_default() += 1;
    }

    let n = hits.len() as f64;
    let entropy: f64 = counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum();

    (entropy / n.ln() * 100.0).clamp(0.0, 100.0)
}

/// Static reputation of a single URL's host
pub fn domain_authority(url: &str) -> f64 {
    let Some(domain) = domain_of(url) else {
        return DEFAULT_AUTHORITY;
    };

    let listed = AUTHORITY_TABLE
        .iter()
        .find(|(suffix, _)| domain == *suffix || domain.ends_with(&format!(".{suffix}")))
        .map(|(_, score)| *score);
    if let Some(score) = listed {
        return score;
    }

    if domain.ends_with(".gov") || domain.contains(".gov.") {
        GOV_AUTHORITY
    } else if domain.ends_with(".edu") || domain.contains(".edu.") || domain.contains(".ac.") {
        EDU_AUTHORITY
    } else {
        DEFAULT_AUTHORITY
    }
}

/// Mean authority of the leading `k` results
pub fn authority_score(hits: &[SearchHit], k: usize) -> f64 {
    let top: Vec<&SearchHit> = hits.iter().take(k.max(1)).collect();
    if top.is_empty() {
        return 0.0;
    }
    top.iter().map(|h| domain_authority(&h.url)).sum::<f64>() / top.len() as f64
}

/// Parse the publication date formats providers commonly return
pub fn parse_published_date(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    let date_part = raw.get(..10).unwrap_or(raw);
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

fn freshness_of(published: Option<&str>, now: DateTime<Utc>) -> f64 {
    let Some(date) = published.and_then(parse_published_date) else {
        return UNKNOWN_FRESHNESS;
    };

    let age_days = (now - date).num_days().max(0);
    FRESHNESS_BUCKETS
        .iter()
        .find(|(limit, _)| age_days < *limit)
        .map(|(_, score)| *score)
        .unwrap_or(STALE_FRESHNESS)
}

/// Mean freshness of the leading `k` results relative to `now`
pub fn freshness_score(hits: &[SearchHit], k: usize, now: DateTime<Utc>) -> f64 {
    let top: Vec<&SearchHit> = hits.iter().take(k.max(1)).collect();
    if top.is_empty() {
        return 0.0;
    }
    top.iter()
        .map(|h| freshness_of(h.published_date.as_deref(), now))
        .sum::<f64>()
        / top.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn hit(url: &str) -> SearchHit {
        SearchHit::new("title", url, "")
    }

    #[test]
    fn test_domain_of_strips_www() {
        assert_eq!(domain_of("https://www.Example.com/path").as_deref(), Some("example.com"));
        assert_eq!(domain_of("not a url"), None);
    }

    #[test]
    fn test_term_overlap() {
        let hits = vec![
            SearchHit::new("Tokio select macro", "https://docs.rs/tokio", "Waits on multiple futures"),
            SearchHit::new("Cooking pasta", "https://food.example", "Boil water"),
        ];
        let score = term_overlap_score("the tokio select macro", &hits, 2);
        assert!((score - 50.0).abs() < 1e-9);
        assert_eq!(term_overlap_score("the of", &hits, 2), 0.0);
    }

    #[test]
    fn test_topic_coverage() {
        let hits = vec![
            SearchHit::new("Tokio select macro", "https://docs.rs/tokio", "Waits on multiple futures"),
            SearchHit::new("Cooking pasta", "https://food.example", "Boil water"),
        ];
        let topics = vec!["Futures".to_string(), "pasta".to_string(), "borrow checker".to_string()];

        assert_eq!(topic_coverage_score(&[], &hits, 2), None);
        assert_eq!(topic_coverage_score(&["  ".to_string()], &hits, 2), None);
        let both = topic_coverage_score(&topics, &hits, 2).unwrap();
        assert!((both - 200.0 / 3.0).abs() < 1e-9);
        // pasta sits outside the leading result
        let first = topic_coverage_score(&topics, &hits, 1).unwrap();
        assert!((first - 100.0 / 3.0).abs() < 1e-9);
        assert_eq!(topic_coverage_score(&topics, &[], 3), Some(0.0));
    }

    #[test]
    fn test_diversity_edge_cases() {
        assert_eq!(diversity_score(&[]), 0.0);
        assert_eq!(diversity_score(&[hit("https://a.com")]), 100.0);

        let same = vec![hit("https://a.com/1"), hit("https://a.com/2"), hit("https://www.a.com/3")];
        assert!(diversity_score(&same).abs() < 1e-9);

        let distinct = vec![hit("https://a.com"), hit("https://b.com"), hit("https://c.com")];
        assert!((diversity_score(&distinct) - 100.0).abs() < 1e-9);

        let mixed = vec![hit("https://a.com/1"), hit("https://a.com/2"), hit("https://b.com")];
        let score = diversity_score(&mixed);
        assert!(score > 0.0 && score < 100.0);
    }

    #[test]
    fn test_authority_table() {
        assert_eq!(domain_authority("https://en.wikipedia.org/wiki/Rust"), 95.0);
        assert_eq!(domain_authority("https://github.com/tokio-rs/tokio"), 90.0);
        assert_eq!(domain_authority("https://www.nasa.gov/"), 90.0);
        assert_eq!(domain_authority("https://cs.stanford.edu/"), 85.0);
        assert_eq!(domain_authority("https://www.ox.ac.uk/"), 85.0);
        assert_eq!(domain_authority("https://random-blog.net/"), 50.0);
        assert_eq!(domain_authority("https://notgithub.com/"), 50.0);
    }

    #[test]
    fn test_freshness_buckets() {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let dated = |date: &str| SearchHit {
            published_date: Some(date.to_string()),
            ..hit("https://a.com")
        };

        assert_eq!(freshness_score(&[dated("2025-05-20")], 5, now), 100.0);
        assert_eq!(freshness_score(&[dated("2025-02-01T12:00:00Z")], 5, now), 80.0);
        assert_eq!(freshness_score(&[dated("2024-09-01")], 5, now), 60.0);
        assert_eq!(freshness_score(&[dated("2023-01-01")], 5, now), 40.0);
        assert_eq!(freshness_score(&[dated("2015-01-01")], 5, now), 20.0);
        assert_eq!(freshness_score(&[hit("https://a.com")], 5, now), 50.0);
        assert_eq!(freshness_score(&[dated("someday")], 5, now), 50.0);
    }
}
