//! Test doubles for providers and scoring services
//!
//! These are deterministic, in-process stand-ins used by the crate's own tests and
//! available to downstream integration tests.

use crate::provider::{CallContext, Provider};
use crate::quality::{EmbeddingRequest, EmbeddingService, Reranker};
use crate::types::{
    CapabilitySet, CrawlOptions, CrawlResponse, CrawledPage, ExtractOptions, ExtractResponse, OperationType,
    SearchHit, SearchOptions, SearchResponse, Usage,
};
use crate::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const DEFAULT_RESULTS: usize = 5;
const DEFAULT_CRAWL_PAGES: usize = 3;

/// What a single [`MockProvider`] attempt does
#[derive(Debug, Clone, PartialEq)]
pub enum MockBehavior {
    Succeed,
    /// Fail with a structured HTTP error
    FailHttp(u16),
    /// Fail with an opaque provider error
    FailWith(String),
    Panic,
    /// Never complete; only a deadline or cancellation ends the call
    Hang,
}

/// Scriptable provider that records how it was called
///
/// Every operation goes through `ctx.retry`, so each retry attempt consumes one
/// scripted behavior. When the script is empty the default behavior applies.
pub struct MockProvider {
    name: String,
    capabilities: CapabilitySet,
    latency: Duration,
    usage: Usage,
    default_behavior: MockBehavior,
    script: Mutex<VecDeque<MockBehavior>>,
    setup_error: Option<String>,
    crawl_pages: Option<usize>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    setup_calls: AtomicUsize,
    teardown_calls: AtomicUsize,
    operations: Mutex<Vec<(OperationType, String)>>,
    last_search_options: Mutex<Option<SearchOptions>>,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            capabilities: CapabilitySet::all_native(),
            latency: Duration::ZERO,
            usage: Usage::default(),
            default_behavior: MockBehavior::Succeed,
            script: Mutex::new(VecDeque::new()),
            setup_error: None,
            crawl_pages: None,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            setup_calls: AtomicUsize::new(0),
            teardown_calls: AtomicUsize::new(0),
            operations: Mutex::new(Vec::new()),
            last_search_options: Mutex::new(None),
        }
    }

    pub fn with_capabilities(mut self, capabilities: CapabilitySet) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Simulated time spent inside each attempt
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = usage;
        self
    }

    pub fn with_default_behavior(mut self, behavior: MockBehavior) -> Self {
        self.default_behavior = behavior;
        self
    }

    /// Behaviors consumed one per attempt, before falling back to the default
    pub fn with_script(self, script: impl IntoIterator<Item = MockBehavior>) -> Self {
        self.script.lock().extend(script);
        self
    }

    pub fn with_failing_setup(mut self, message: impl Into<String>) -> Self {
        self.setup_error = Some(message.into());
        self
    }

    /// Return exactly `pages` pages from every crawl, ignoring the page budget
    pub fn with_crawl_pages(mut self, pages: usize) -> Self {
        self.crawl_pages = Some(pages);
        self
    }

    /// Attempts made across all operations, retries included
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Highest number of attempts observed running at once
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn setup_calls(&self) -> usize {
        self.setup_calls.load(Ordering::SeqCst)
    }

    pub fn teardown_calls(&self) -> usize {
        self.teardown_calls.load(Ordering::SeqCst)
    }

    /// Every attempt as (operation, input), in call order
    pub fn operations(&self) -> Vec<(OperationType, String)> {
        self.operations.lock().clone()
    }

    pub fn last_search_options(&self) -> Option<SearchOptions> {
        self.last_search_options.lock().clone()
    }

    async fn attempt(&self, operation: OperationType, input: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        self.operations.lock().push((operation, input.to_string()));
        let behavior = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.default_behavior.clone());

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match behavior {
            MockBehavior::Succeed => Ok(()),
            MockBehavior::FailHttp(status) => Err(Error::Http {
                status,
                message: format!("mock status {}", status),
                retry_after: None,
            }),
            MockBehavior::FailWith(message) => Err(Error::provider(&self.name, message)),
            MockBehavior::Panic => panic!("mock provider '{}' panicked", self.name),
            MockBehavior::Hang => std::future::pending::<Result<()>>().await,
        }
    }

    async fn run(&self, ctx: &CallContext, operation: OperationType, input: &str) -> Result<()> {
        ctx.retry
            .do_with_retry(&ctx.cancel, |_| self.attempt(operation, input))
            .await
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn search(&self, ctx: &CallContext, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        *self.last_search_options.lock() = Some(options.clone());
        self.run(ctx, OperationType::Search, query).await?;

        let count = options.max_results.unwrap_or(DEFAULT_RESULTS);
        let results = (0..count)
            .map(|i| {
                SearchHit::new(
                    format!("{} result {}", query, i + 1),
                    format!("https://site{}.example.com/{}", i % 3, i),
                    format!("A page about {}", query),
                )
            })
            .collect();

        Ok(SearchResponse {
            results,
            usage: self.usage,
            provider_latency: Some(self.latency),
        })
    }

    async fn extract(&self, ctx: &CallContext, url: &str, _options: &ExtractOptions) -> Result<ExtractResponse> {
        self.run(ctx, OperationType::Extract, url).await?;

        Ok(ExtractResponse {
            url: url.to_string(),
            content: format!(
                "# Extracted\n\nContent of {} rendered by {}. {}",
                url,
                self.name,
                "The body has a few sentences of text. ".repeat(8)
            ),
            title: Some("Extracted".to_string()),
            usage: self.usage,
            provider_latency: Some(self.latency),
        })
    }

    async fn crawl(&self, ctx: &CallContext, url: &str, options: &CrawlOptions) -> Result<CrawlResponse> {
        self.run(ctx, OperationType::Crawl, url).await?;

        let count = self
            .crawl_pages
            .or(options.max_pages)
            .unwrap_or(DEFAULT_CRAWL_PAGES);
        let pages = (0..count)
            .map(|i| {
                CrawledPage::new(
                    format!("{}/page-{}", url.trim_end_matches('/'), i),
                    format!("# Page {}\n\nDistinct body for page number {} of the crawl.", i, i),
                    usize::from(i > 0),
                )
            })
            .collect();

        Ok(CrawlResponse {
            pages,
            usage: self.usage,
            provider_latency: Some(self.latency),
        })
    }

    async fn setup(&self) -> Result<()> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        match &self.setup_error {
            Some(message) => Err(Error::provider(&self.name, message.clone())),
            None => Ok(()),
        }
    }

    async fn teardown(&self) -> Result<()> {
        self.teardown_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Deterministic bag-of-characters embeddings
#[derive(Debug, Default)]
pub struct MockEmbeddingService {
    dimensions: usize,
    fail: bool,
    hang: bool,
    calls: AtomicUsize,
    texts: AtomicUsize,
}

impl MockEmbeddingService {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
            ..Default::default()
        }
    }

    /// Service whose every call fails
    pub fn failing() -> Self {
        Self {
            dimensions: 1,
            fail: true,
            ..Default::default()
        }
    }

    /// Service that never answers and ignores cancellation
    pub fn hanging() -> Self {
        Self {
            dimensions: 1,
            hang: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Texts embedded across all calls
    pub fn texts_embedded(&self) -> usize {
        self.texts.load(Ordering::SeqCst)
    }

    fn vectorize(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimensions];
        for c in text.to_lowercase().chars().filter(|c| c.is_alphanumeric()) {
            vector[c as usize % self.dimensions] += 1.0;
        }
        vector
    }
}

#[async_trait]
impl EmbeddingService for MockEmbeddingService {
    fn name(&self) -> &str {
        "mock-embeddings"
    }

    async fn embed(&self, _cancel: &CancellationToken, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Embedding("mock embedding service unavailable".to_string()));
        }
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.texts.fetch_add(request.texts.len(), Ordering::SeqCst);
        Ok(request.texts.iter().map(|t| self.vectorize(t)).collect())
    }
}

/// Reranker returning a fixed relevance for every document
#[derive(Debug, Default)]
pub struct MockReranker {
    score: f64,
    fail: bool,
    calls: AtomicUsize,
}

impl MockReranker {
    pub fn constant(score: f64) -> Self {
        Self {
            score,
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reranker for MockReranker {
    fn name(&self) -> &str {
        "mock-reranker"
    }

    async fn rerank(&self, _cancel: &CancellationToken, _query: &str, documents: &[String]) -> Result<Vec<f64>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(Error::Embedding("mock reranker unavailable".to_string()));
        }
        Ok(vec![self.score; documents.len()])
    }
}
