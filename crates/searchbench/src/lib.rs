//! Benchmark execution and reliability engine for web search, extract and crawl providers
//!
//! This crate schedules a matrix of (test × provider × repeat) operations under bounded
//! concurrency, shields provider calls with retries and per-provider rate limits,
//! collects results thread-safely and scores output quality (semantic similarity,
//! reranker confidence and heuristics) with a cached embedding layer.

pub mod cache;
pub mod config;
pub mod cost;
pub mod error;
pub mod metrics;
pub mod observer;
pub mod provider;
pub mod quality;
pub mod ratelimit;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod suite;
pub mod testing;
pub mod types;

pub use cache::{CacheStats, EmbeddingCache, EmbeddingKey};
pub use config::{
    BenchmarkConfig, BenchmarkMode, CapabilityPolicy, EmbeddingCacheConfig, QualityConfig, QualityWeights,
    RateLimitConfig, RetryConfig,
};
pub use cost::{CostTable, ProviderCost};
pub use error::{Error, ErrorCategory, Result};
pub use metrics::MetricsCollector;
pub use observer::{ChannelObserver, NoopObserver, RunEvent, RunObserver, TracingObserver};
pub use provider::{CallContext, Provider};
pub use quality::{
    CachedEmbedder, CrawlQualityScore, EmbeddingRequest, EmbeddingService, ExtractQualityScore, HttpEmbeddingService,
    HttpReranker, QualityScorer, Reranker, SearchQualityScore,
};
pub use ratelimit::{RateLimiter, RateLimiterRegistry};
pub use registry::ProviderRegistry;
pub use retry::{HttpResponse, RetryPolicy};
pub use runner::BenchmarkRunner;
pub use suite::TestSuite;
pub use types::{
    CapabilityLevel, CapabilitySet, CrawlOptions, CrawlResponse, CrawledPage, ExtractOptions, ExtractResponse,
    OperationResult, OperationType, SearchHit, SearchOptions, SearchResponse, Summary, TestSpec, Usage,
};
