//! Benchmark runner for executing and collecting results
//!
//! This module schedules the full (test × provider × repeat) matrix under bounded
//! concurrency. Each unit runs as its own task with its own deadline and produces
//! exactly one [`OperationResult`], whatever happens to the provider call.

use crate::config::{BenchmarkConfig, BenchmarkMode, CapabilityPolicy, RetryConfig};
use crate::cost::CostTable;
use crate::metrics::MetricsCollector;
use crate::observer::{RunEvent, RunObserver};
use crate::provider::{CallContext, Provider};
use crate::quality::QualityScorer;
use crate::ratelimit::{RateLimiter, RateLimiterRegistry};
use crate::registry::ProviderRegistry;
use crate::retry::RetryPolicy;
use crate::suite::validate_tests;
use crate::types::{
    CapabilityLevel, CrawlOptions, CrawlResponse, ExtractOptions, ExtractResponse, OperationResult, OperationType,
    SearchOptions, SearchResponse, TestSpec, Usage,
};
use crate::{Error, Result};
use ahash::AHashMap;
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Raw provider output for one unit
enum ProviderOutput {
    Search(SearchResponse),
    Extract(ExtractResponse),
    Crawl(CrawlResponse),
}

impl ProviderOutput {
    fn usage(&self) -> Usage {
        match self {
            Self::Search(r) => r.usage,
            Self::Extract(r) => r.usage,
            Self::Crawl(r) => r.usage,
        }
    }

    fn provider_latency(&self) -> Option<Duration> {
        match self {
            Self::Search(r) => r.provider_latency,
            Self::Extract(r) => r.provider_latency,
            Self::Crawl(r) => r.provider_latency,
        }
    }

    fn results_count(&self) -> usize {
        match self {
            Self::Search(r) => r.results.len(),
            Self::Extract(r) => usize::from(!r.content.is_empty()),
            Self::Crawl(r) => r.pages.len(),
        }
    }

    fn content_length(&self) -> usize {
        match self {
            Self::Search(r) => r
                .results
                .iter()
                .map(|h| h.title.chars().count() + h.snippet.chars().count())
                .sum(),
            Self::Extract(r) => r.content.chars().count(),
            Self::Crawl(r) => r.pages.iter().map(|p| p.content.chars().count()).sum(),
        }
    }
}

/// Whether a unit runs, and how
#[derive(Debug, Clone, PartialEq)]
enum Admission {
    Run { emulated: bool },
    Skip(String),
}

fn admit(level: CapabilityLevel, mode: BenchmarkMode, policy: CapabilityPolicy, operation: OperationType) -> Admission {
    match level {
        CapabilityLevel::Native => Admission::Run { emulated: false },
        CapabilityLevel::Unsupported => Admission::Skip(format!("{} not supported", operation)),
        CapabilityLevel::Emulated if mode == BenchmarkMode::Normalized && policy == CapabilityPolicy::Strict => {
            Admission::Skip(format!("{} is emulated; strict policy in normalized mode", operation))
        }
        CapabilityLevel::Emulated => Admission::Run { emulated: true },
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// State shared by every unit of one run
struct RunShared {
    timeout: Duration,
    mode: BenchmarkMode,
    policy: CapabilityPolicy,
    normalized_max_results: usize,
    retry: RetryConfig,
    costs: CostTable,
    scorer: Option<Arc<QualityScorer>>,
    collector: Arc<MetricsCollector>,
    observers: Vec<Arc<dyn RunObserver>>,
    cancel: CancellationToken,
    global: Arc<Semaphore>,
    completed: AtomicUsize,
    total: usize,
}

impl RunShared {
    fn emit(&self, event: RunEvent) {
        for observer in &self.observers {
            observer.on_event(&event);
        }
    }

    fn record(&self, result: OperationResult) {
        self.collector.add_result(result.clone());
        let completed = self.completed.fetch_add(1, Ordering::SeqCst) + 1;

        if !self.observers.is_empty() {
            let event = if result.skipped {
                RunEvent::TaskSkipped(result)
            } else if result.success {
                RunEvent::TaskCompleted(result)
            } else {
                RunEvent::TaskFailed(result)
            };
            self.emit(event);
            self.emit(RunEvent::Progress {
                completed,
                total: self.total,
            });
        }
    }

    fn search_options(&self) -> SearchOptions {
        SearchOptions {
            max_results: (self.mode == BenchmarkMode::Normalized).then_some(self.normalized_max_results),
        }
    }

    async fn acquire(&self, provider_limit: Option<Arc<Semaphore>>) -> Result<Vec<OwnedSemaphorePermit>> {
        let mut permits = Vec::with_capacity(2);
        if let Some(semaphore) = provider_limit {
            permits.push(
                semaphore
                    .acquire_owned()
                    .await
                    .map_err(|_| Error::Cancelled)?,
            );
        }
        permits.push(
            Arc::clone(&self.global)
                .acquire_owned()
                .await
                .map_err(|_| Error::Cancelled)?,
        );
        Ok(permits)
    }
}

/// One (test, provider, iteration) unit
struct Unit {
    test: Arc<TestSpec>,
    provider: Arc<dyn Provider>,
    provider_limit: Option<Arc<Semaphore>>,
    limiter: Arc<RateLimiter>,
    iteration: usize,
}

impl Unit {
    async fn execute(self, shared: Arc<RunShared>) {
        let provider_name = self.provider.name().to_string();
        let mut result = OperationResult::pending(&self.test, &provider_name, self.iteration);

        let level = self.provider.capabilities().level(self.test.operation);
        match admit(level, shared.mode, shared.policy, self.test.operation) {
            Admission::Skip(reason) => {
                info!(test = %self.test.name, provider = %provider_name, reason = %reason, "skipping unit");
                result.mark_skipped(reason);
                shared.record(result);
                return;
            }
            Admission::Run { emulated } => result.emulated = emulated,
        }

        let permits = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => Err(Error::Cancelled),
            permits = shared.acquire(self.provider_limit.clone()) => permits,
        };
        let permits = match permits {
            Ok(permits) => permits,
            Err(err) => {
                result.mark_failed(&err);
                shared.record(result);
                return;
            }
        };

        let unit_cancel = shared.cancel.child_token();
        let ctx = CallContext::new(
            unit_cancel.clone(),
            RetryPolicy::new(shared.retry.clone()).with_rate_limiter(Arc::clone(&self.limiter)),
        );

        shared.emit(RunEvent::TaskStarted {
            test_name: self.test.name.clone(),
            provider: provider_name.clone(),
            operation: self.test.operation,
            iteration: self.iteration,
        });
        debug!(test = %self.test.name, provider = %provider_name, iteration = self.iteration, "unit started");

        let started = Instant::now();
        let deadline = tokio::time::Instant::now() + shared.timeout;
        let call = AssertUnwindSafe(self.invoke(&ctx, &shared)).catch_unwind();
        let outcome = tokio::select! {
            timed = tokio::time::timeout_at(deadline, call) => match timed {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(payload)) => Err(Error::Panic(panic_message(payload))),
                Err(_) => {
                    unit_cancel.cancel();
                    Err(Error::Timeout(format!(
                        "operation exceeded {}ms deadline",
                        shared.timeout.as_millis()
                    )))
                }
            },
            _ = unit_cancel.cancelled() => Err(Error::Cancelled),
        };
        result.latency = started.elapsed();
        drop(permits);

        match outcome {
            Ok(output) => {
                self.fill_success(&mut result, &output, &shared);
                self.score(&mut result, &output, &shared, &unit_cancel, deadline).await;
                debug!(
                    test = %self.test.name,
                    provider = %provider_name,
                    latency_ms = result.latency.as_millis() as u64,
                    "unit succeeded"
                );
            }
            Err(err) => {
                result.mark_failed(&err);
                debug!(
                    test = %self.test.name,
                    provider = %provider_name,
                    category = %err.category(),
                    error = %err,
                    "unit failed"
                );
            }
        }

        shared.record(result);
    }

    async fn invoke(&self, ctx: &CallContext, shared: &RunShared) -> Result<ProviderOutput> {
        let test = &self.test;
        match test.operation {
            OperationType::Search => self
                .provider
                .search(ctx, test.input(), &shared.search_options())
                .await
                .map(ProviderOutput::Search),
            OperationType::Extract => self
                .provider
                .extract(ctx, test.input(), &ExtractOptions { markdown: true })
                .await
                .map(ProviderOutput::Extract),
            OperationType::Crawl => {
                let response = self.provider.crawl(ctx, test.input(), &self.crawl_options()).await?;
                if response.pages.is_empty() {
                    return Err(Error::CrawlFailed(format!("no pages returned for {}", test.input())));
                }
                Ok(ProviderOutput::Crawl(response))
            }
        }
    }

    fn crawl_options(&self) -> CrawlOptions {
        CrawlOptions {
            max_pages: self.test.max_pages,
            max_depth: self.test.max_depth,
        }
    }

    fn fill_success(&self, result: &mut OperationResult, output: &ProviderOutput, shared: &RunShared) {
        let pages = match output {
            ProviderOutput::Crawl(r) => r.pages.len(),
            _ => 1,
        };
        let content_length = output.content_length();
        let (credits, reported) = shared.costs.resolve(
            &result.provider,
            self.test.operation,
            output.usage(),
            pages,
            content_length,
        );

        result.mark_succeeded();
        result.provider_latency = output.provider_latency();
        result.results_count = output.results_count();
        result.content_length = content_length;
        result.credits_used = credits;
        result.usage_reported = reported;
    }

    /// Best-effort quality scoring bounded by the unit deadline
    ///
    /// A scorer that panics, overruns the deadline or is cancelled leaves the result
    /// successful but unscored.
    async fn score(
        &self,
        result: &mut OperationResult,
        output: &ProviderOutput,
        shared: &RunShared,
        cancel: &CancellationToken,
        deadline: tokio::time::Instant,
    ) {
        let Some(scorer) = &shared.scorer else {
            return;
        };

        let scoring = async {
            match output {
                ProviderOutput::Search(response) => {
                    let score = scorer
                        .score_search_with_topics(cancel, self.test.input(), &self.test.expected_topics, &response.results)
                        .await;
                    (
                        score.overall,
                        score.semantic_available.then_some(score.semantic),
                        score.reranker_available.then_some(score.reranker),
                    )
                }
                ProviderOutput::Extract(response) => {
                    let score = scorer.score_extract(&response.content, &response.url, &self.test.expected_content);
                    (score.overall, None, None)
                }
                ProviderOutput::Crawl(response) => {
                    let score = scorer.score_crawl(response, &self.crawl_options());
                    (score.overall, None, None)
                }
            }
        };

        let scored = tokio::select! {
            timed = tokio::time::timeout_at(deadline, AssertUnwindSafe(scoring).catch_unwind()) => match timed {
                Ok(scored) => scored,
                Err(_) => {
                    cancel.cancel();
                    warn!(
                        test = %self.test.name,
                        provider = %result.provider,
                        "quality scoring exceeded unit deadline"
                    );
                    return;
                }
            },
            _ = cancel.cancelled() => return,
        };

        match scored {
            Ok((overall, semantic, reranker)) => {
                result.quality_score = Some(overall);
                result.semantic_score = semantic;
                result.reranker_score = reranker;
            }
            Err(payload) => warn!(
                test = %self.test.name,
                provider = %result.provider,
                error = %panic_message(payload),
                "quality scoring failed"
            ),
        }
    }
}

/// Orchestrates benchmark execution across tests and providers
pub struct BenchmarkRunner {
    config: BenchmarkConfig,
    registry: ProviderRegistry,
    collector: Arc<MetricsCollector>,
    scorer: Option<Arc<QualityScorer>>,
    observers: Vec<Arc<dyn RunObserver>>,
    costs: CostTable,
    cancel: CancellationToken,
}

impl BenchmarkRunner {
    /// Create a new benchmark runner
    pub fn new(config: BenchmarkConfig, registry: ProviderRegistry) -> Self {
        let costs = config.costs.clone();
        Self {
            config,
            registry,
            collector: Arc::new(MetricsCollector::new()),
            scorer: None,
            observers: Vec::new(),
            costs,
            cancel: CancellationToken::new(),
        }
    }

    /// Use `scorer` instead of the heuristic-only default
    pub fn with_scorer(mut self, scorer: QualityScorer) -> Self {
        self.scorer = Some(Arc::new(scorer));
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn RunObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Replace the price table taken from the configuration
    pub fn with_cost_table(mut self, costs: CostTable) -> Self {
        self.costs = costs;
        self
    }

    /// Results collected so far
    pub fn collector(&self) -> Arc<MetricsCollector> {
        Arc::clone(&self.collector)
    }

    /// Token that cancels the whole run when fired
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Get reference to benchmark configuration
    pub fn config(&self) -> &BenchmarkConfig {
        &self.config
    }

    /// Create the configured output directory if it does not exist
    pub fn ensure_output_dir(&self) -> Result<()> {
        let dir = &self.config.output_dir;
        std::fs::create_dir_all(dir).map_err(|e| {
            Error::Config(format!("failed to create output directory {}: {}", dir.display(), e))
        })
    }

    fn resolve_providers(&self, provider_names: &[String]) -> Vec<Arc<dyn Provider>> {
        if provider_names.is_empty() {
            return self
                .registry
                .provider_names()
                .iter()
                .filter_map(|name| self.registry.get(name))
                .collect();
        }

        provider_names
            .iter()
            .filter_map(|name| {
                let provider = self.registry.get(name);
                if provider.is_none() {
                    warn!(provider = %name, "unknown provider requested; ignoring");
                }
                provider
            })
            .collect()
    }

    fn resolve_scorer(&self) -> Result<Option<Arc<QualityScorer>>> {
        if !self.config.quality.enabled {
            return Ok(None);
        }
        match &self.scorer {
            Some(scorer) => Ok(Some(Arc::clone(scorer))),
            None => Ok(Some(Arc::new(QualityScorer::new(self.config.quality.clone())?))),
        }
    }

    /// Run `tests` against the named providers (empty = all registered)
    ///
    /// Results accumulate in [`BenchmarkRunner::collector`]. Provider failures,
    /// timeouts and panics are recorded as failed results and never abort the run.
    ///
    /// # Errors
    ///
    /// Returns an error only for setup failures: invalid configuration or tests, no
    /// usable providers, output directory creation, or a provider `setup()` failure.
    pub async fn run(&self, tests: &[TestSpec], provider_names: &[String]) -> Result<()> {
        self.config.validate()?;
        validate_tests(tests)?;

        let providers = self.resolve_providers(provider_names);
        if providers.is_empty() {
            return Err(Error::Benchmark("No providers available for benchmarking".to_string()));
        }

        self.ensure_output_dir()?;
        let scorer = self.resolve_scorer()?;

        for (idx, provider) in providers.iter().enumerate() {
            if let Err(err) = provider.setup().await {
                error!(provider = %provider.name(), error = %err, "provider setup failed");
                for ready in &providers[..idx] {
                    if let Err(teardown_err) = ready.teardown().await {
                        warn!(provider = %ready.name(), error = %teardown_err, "provider teardown failed");
                    }
                }
                return Err(err);
            }
        }

        let limiters = RateLimiterRegistry::new(self.config.rate_limits.clone());
        let provider_limits: AHashMap<String, Arc<Semaphore>> = match self.config.per_provider_concurrency {
            Some(limit) => providers
                .iter()
                .map(|p| (p.name().to_string(), Arc::new(Semaphore::new(limit))))
                .collect(),
            None => AHashMap::new(),
        };

        let tests: Vec<Arc<TestSpec>> = tests.iter().cloned().map(Arc::new).collect();
        let total = tests.len() * providers.len() * self.config.repeats;

        let shared = Arc::new(RunShared {
            timeout: self.config.timeout,
            mode: self.config.mode,
            policy: self.config.capability_policy,
            normalized_max_results: self.config.normalized_max_results,
            retry: self.config.retry.clone(),
            costs: self.costs.clone(),
            scorer,
            collector: Arc::clone(&self.collector),
            observers: self.observers.clone(),
            cancel: self.cancel.clone(),
            global: Arc::new(Semaphore::new(self.config.concurrency)),
            completed: AtomicUsize::new(0),
            total,
        });

        info!(
            tests = tests.len(),
            providers = providers.len(),
            repeats = self.config.repeats,
            total,
            concurrency = self.config.concurrency,
            "starting benchmark run"
        );

        let mut tasks = JoinSet::new();
        for test in &tests {
            for provider in &providers {
                let limiter = limiters.get(provider.name());
                let provider_limit = provider_limits.get(provider.name()).cloned();
                for iteration in 0..self.config.repeats {
                    let unit = Unit {
                        test: Arc::clone(test),
                        provider: Arc::clone(provider),
                        provider_limit: provider_limit.clone(),
                        limiter: Arc::clone(&limiter),
                        iteration,
                    };
                    tasks.spawn(unit.execute(Arc::clone(&shared)));
                }
            }
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(err) = joined {
                error!(error = %err, "benchmark task aborted without recording a result");
            }
        }

        for provider in &providers {
            if let Err(err) = provider.teardown().await {
                warn!(provider = %provider.name(), error = %err, "provider teardown failed");
            }
        }

        info!(
            recorded = shared.completed.load(Ordering::SeqCst),
            total, "benchmark run finished"
        );
        Ok(())
    }
}
