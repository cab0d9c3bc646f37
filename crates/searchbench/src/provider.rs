//! Provider trait for web search / extract / crawl services
//!
//! Concrete provider clients live outside this crate; the runner only sees this
//! trait. Every HTTP call a provider makes should go through [`CallContext::retry`]
//! so it is paced, retried and cancelled consistently.

use crate::retry::RetryPolicy;
use crate::types::{
    CapabilitySet, CrawlOptions, CrawlResponse, ExtractOptions, ExtractResponse, OperationType, SearchOptions,
    SearchResponse,
};
use crate::{Error, Result};
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

/// Per-call context handed to providers
#[derive(Debug, Clone)]
pub struct CallContext {
    /// Fires when the unit times out or the run is cancelled
    pub cancel: CancellationToken,
    /// Retry policy wired to the provider's rate limiter
    pub retry: RetryPolicy,
}

impl CallContext {
    pub fn new(cancel: CancellationToken, retry: RetryPolicy) -> Self {
        Self { cancel, retry }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// A benchmarked web data provider
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider name, used as the key for limits, costs and results
    fn name(&self) -> &str;

    /// Support level for each operation type
    fn capabilities(&self) -> CapabilitySet;

    async fn search(&self, ctx: &CallContext, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        let _ = (ctx, query, options);
        Err(self.unsupported(OperationType::Search))
    }

    async fn extract(&self, ctx: &CallContext, url: &str, options: &ExtractOptions) -> Result<ExtractResponse> {
        let _ = (ctx, url, options);
        Err(self.unsupported(OperationType::Extract))
    }

    async fn crawl(&self, ctx: &CallContext, url: &str, options: &CrawlOptions) -> Result<CrawlResponse> {
        let _ = (ctx, url, options);
        Err(self.unsupported(OperationType::Crawl))
    }

    /// Called once per run before any operation
    async fn setup(&self) -> Result<()> {
        Ok(())
    }

    /// Called once per run after every operation finished
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }

    fn unsupported(&self, operation: OperationType) -> Error {
        Error::Unsupported {
            provider: self.name().to_string(),
            operation,
        }
    }
}
