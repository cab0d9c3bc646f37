//! Core data model: test definitions, capabilities, provider payloads and results

use crate::error::ErrorCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The atomic benchmarked action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Search,
    Extract,
    Crawl,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Search => "search",
            Self::Extract => "extract",
            Self::Crawl => "crawl",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a provider supports one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityLevel {
    /// First-class provider support
    Native,
    /// Achieved by composing other provider calls
    Emulated,
    #[default]
    Unsupported,
}

/// Per-provider declaration of support for each operation type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct CapabilitySet {
    #[serde(default)]
    pub search: CapabilityLevel,
    #[serde(default)]
    pub extract: CapabilityLevel,
    #[serde(default)]
    pub crawl: CapabilityLevel,
}

impl CapabilitySet {
    /// Every operation supported natively
    pub fn all_native() -> Self {
        Self {
            search: CapabilityLevel::Native,
            extract: CapabilityLevel::Native,
            crawl: CapabilityLevel::Native,
        }
    }

    /// Only search supported natively
    pub fn search_only() -> Self {
        Self {
            search: CapabilityLevel::Native,
            ..Default::default()
        }
    }

    pub fn level(&self, operation: OperationType) -> CapabilityLevel {
        match operation {
            OperationType::Search => self.search,
            OperationType::Extract => self.extract,
            OperationType::Crawl => self.crawl,
        }
    }

    pub fn with_level(mut self, operation: OperationType, level: CapabilityLevel) -> Self {
        match operation {
            OperationType::Search => self.search = level,
            OperationType::Extract => self.extract = level,
            OperationType::Crawl => self.crawl = level,
        }
        self
    }
}

/// One benchmark test case
///
/// Immutable once loaded; the runner shares a single instance across every provider
/// and repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub operation: OperationType,

    /// Search query (search tests)
    #[serde(default)]
    pub query: Option<String>,

    /// Target URL (extract and crawl tests)
    #[serde(default)]
    pub url: Option<String>,

    /// Page budget for crawl tests
    #[serde(default)]
    pub max_pages: Option<usize>,

    /// Link depth budget for crawl tests
    #[serde(default)]
    pub max_depth: Option<usize>,

    /// Topics a good result set should cover
    #[serde(default)]
    pub expected_topics: Vec<String>,

    /// Phrases the extracted content should contain
    #[serde(default)]
    pub expected_content: Vec<String>,
}

impl TestSpec {
    pub fn search(name: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            operation: OperationType::Search,
            query: Some(query.into()),
            url: None,
            max_pages: None,
            max_depth: None,
            expected_topics: vec![],
            expected_content: vec![],
        }
    }

    pub fn extract(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            operation: OperationType::Extract,
            query: None,
            url: Some(url.into()),
            ..Self::search(name, "")
        }
    }

    pub fn crawl(name: impl Into<String>, url: impl Into<String>, max_pages: usize, max_depth: usize) -> Self {
        Self {
            operation: OperationType::Crawl,
            query: None,
            url: Some(url.into()),
            max_pages: Some(max_pages),
            max_depth: Some(max_depth),
            ..Self::search(name, "")
        }
    }

    /// Query or URL, whichever the operation consumes
    pub fn input(&self) -> &str {
        match self.operation {
            OperationType::Search => self.query.as_deref().unwrap_or_default(),
            OperationType::Extract | OperationType::Crawl => self.url.as_deref().unwrap_or_default(),
        }
    }

    /// Validate the test definition
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidTest`] when a required field is missing or empty
    pub fn validate(&self) -> crate::Result<()> {
        let invalid = |reason: &str| crate::Error::InvalidTest {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name cannot be empty"));
        }

        match self.operation {
            OperationType::Search => {
                if self.query.as_deref().is_none_or(|q| q.trim().is_empty()) {
                    return Err(invalid("search tests require a query"));
                }
            }
            OperationType::Extract | OperationType::Crawl => {
                let Some(raw) = self.url.as_deref().filter(|u| !u.trim().is_empty()) else {
                    return Err(invalid("extract and crawl tests require a url"));
                };
                if url::Url::parse(raw).is_err() {
                    return Err(invalid(&format!("invalid url: {raw}")));
                }
            }
        }

        if self.operation == OperationType::Crawl && self.max_pages == Some(0) {
            return Err(invalid("max_pages must be > 0"));
        }

        Ok(())
    }
}

/// Provider-side usage accounting
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Usage {
    /// Credits the provider says it charged; `None` when it does not report usage
    pub credits: Option<f64>,
}

impl Usage {
    pub fn reported(credits: f64) -> Self {
        Self { credits: Some(credits) }
    }
}

/// A single search hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub snippet: String,
    /// Provider's own relevance score, if any
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub published_date: Option<String>,
}

impl SearchHit {
    pub fn new(title: impl Into<String>, url: impl Into<String>, snippet: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
            snippet: snippet.into(),
            score: None,
            published_date: None,
        }
    }

    /// Text used for semantic and reranker scoring
    pub fn scoring_text(&self) -> String {
        if self.snippet.is_empty() {
            self.title.clone()
        } else {
            format!("{}\n{}", self.title, self.snippet)
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    #[serde(default)]
    pub usage: Usage,
    /// Latency the provider reports for its own processing
    #[serde(default)]
    pub provider_latency: Option<Duration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractResponse {
    pub url: String,
    /// Extracted content as markdown
    pub content: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub provider_latency: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub content: String,
    #[serde(default)]
    pub depth: usize,
}

impl CrawledPage {
    pub fn new(url: impl Into<String>, content: impl Into<String>, depth: usize) -> Self {
        Self {
            url: url.into(),
            content: content.into(),
            depth,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CrawlResponse {
    pub pages: Vec<CrawledPage>,
    #[serde(default)]
    pub usage: Usage,
    #[serde(default)]
    pub provider_latency: Option<Duration>,
}

/// Options handed to a provider's search call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// `None` lets the provider use its own default (native mode)
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractOptions {
    /// Ask the provider for markdown output where it has a choice
    pub markdown: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CrawlOptions {
    pub max_pages: Option<usize>,
    pub max_depth: Option<usize>,
}

/// Outcome of one (test, provider, iteration) execution
///
/// Built on a local value by the runner and appended to the collector exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationResult {
    pub test_name: String,
    pub provider: String,
    #[serde(rename = "type")]
    pub operation: OperationType,
    /// Zero-based repeat index
    pub iteration: usize,
    pub success: bool,
    pub error: Option<String>,
    pub error_category: Option<ErrorCategory>,
    /// Wall-clock latency measured around the provider call
    pub latency: Duration,
    pub provider_latency: Option<Duration>,
    pub credits_used: f64,
    /// `true` when `credits_used` came from the provider, `false` when estimated
    pub usage_reported: bool,
    pub content_length: usize,
    pub results_count: usize,
    pub quality_score: Option<f64>,
    pub semantic_score: Option<f64>,
    pub reranker_score: Option<f64>,
    /// Operation ran through an emulated capability
    pub emulated: bool,
    pub skipped: bool,
    pub skip_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl OperationResult {
    /// Blank result for a unit, before any terminal status is assigned
    pub fn pending(test: &TestSpec, provider: &str, iteration: usize) -> Self {
        Self {
            test_name: test.name.clone(),
            provider: provider.to_string(),
            operation: test.operation,
            iteration,
            success: false,
            error: None,
            error_category: None,
            latency: Duration::ZERO,
            provider_latency: None,
            credits_used: 0.0,
            usage_reported: false,
            content_length: 0,
            results_count: 0,
            quality_score: None,
            semantic_score: None,
            reranker_score: None,
            emulated: false,
            skipped: false,
            skip_reason: None,
            timestamp: Utc::now(),
        }
    }

    pub fn mark_skipped(&mut self, reason: impl Into<String>) {
        self.success = false;
        self.error = None;
        self.error_category = None;
        self.skipped = true;
        self.skip_reason = Some(reason.into());
    }

    pub fn mark_failed(&mut self, error: &crate::Error) {
        self.success = false;
        self.skipped = false;
        self.skip_reason = None;
        self.error = Some(error.to_string());
        self.error_category = Some(error.category());
    }

    pub fn mark_succeeded(&mut self) {
        self.success = true;
        self.skipped = false;
        self.skip_reason = None;
        self.error = None;
        self.error_category = None;
    }

    /// Identity of the unit this result belongs to
    pub fn key(&self) -> (&str, &str, usize) {
        (&self.test_name, &self.provider, self.iteration)
    }
}

/// Per-provider aggregate, recomputed on demand from the collected results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub provider: String,
    pub total: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub skipped_count: usize,
    /// Successes over executed (non-skipped) operations
    pub success_rate: f64,
    pub min_latency: Duration,
    pub avg_latency: Duration,
    pub max_latency: Duration,
    pub p50_latency: Duration,
    pub p95_latency: Duration,
    pub total_credits: f64,
    pub avg_credits: f64,
    pub reported_credits: f64,
    pub estimated_credits: f64,
    pub avg_content_length: f64,
    pub avg_quality_score: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_deserializes_type_field() {
        let json = r#"{"name": "rust async", "type": "search", "query": "tokio select", "expected_topics": ["tokio"]}"#;
        let spec: TestSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.operation, OperationType::Search);
        assert_eq!(spec.input(), "tokio select");
        assert_eq!(spec.expected_topics, vec!["tokio".to_string()]);
        assert!(spec.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_inputs() {
        let mut search = TestSpec::search("q", "   ");
        assert!(search.validate().is_err());
        search.query = None;
        assert!(search.validate().is_err());

        let extract = TestSpec::extract("e", "not a url");
        let err = extract.validate().unwrap_err();
        assert!(err.to_string().contains("invalid url"));

        let crawl = TestSpec::crawl("c", "https://example.com", 0, 1);
        assert!(crawl.validate().is_err());

        let unnamed = TestSpec::search("", "query");
        assert!(unnamed.validate().is_err());
    }

    #[test]
    fn test_capability_levels() {
        let caps = CapabilitySet::search_only().with_level(OperationType::Crawl, CapabilityLevel::Emulated);
        assert_eq!(caps.level(OperationType::Search), CapabilityLevel::Native);
        assert_eq!(caps.level(OperationType::Extract), CapabilityLevel::Unsupported);
        assert_eq!(caps.level(OperationType::Crawl), CapabilityLevel::Emulated);
    }

    #[test]
    fn test_terminal_status_is_exclusive() {
        let spec = TestSpec::search("q", "query");
        let mut result = OperationResult::pending(&spec, "mock", 0);

        result.mark_failed(&crate::Error::Timeout("deadline".into()));
        assert!(!result.success && !result.skipped);
        assert_eq!(result.error_category, Some(ErrorCategory::Timeout));

        result.mark_skipped("unsupported");
        assert!(result.skipped && !result.success);
        assert!(result.error.is_none() && result.error_category.is_none());

        result.mark_succeeded();
        assert!(result.success && !result.skipped);
        assert!(result.skip_reason.is_none());
    }
}
