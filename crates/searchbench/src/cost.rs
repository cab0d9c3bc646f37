//! Credit accounting
//!
//! Providers that report usage are taken at their word. For the rest, credits are
//! estimated from a per-provider price table supplied with the run configuration.

use crate::types::{OperationType, Usage};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Price sheet for one provider, in provider credits
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderCost {
    /// Flat price per search call
    pub search: f64,
    /// Flat price per extract call
    pub extract: f64,
    /// Price per crawled page
    pub crawl_per_page: f64,
    /// Additional price per 1000 characters of returned content
    pub per_1k_chars: f64,
}

impl ProviderCost {
    /// Estimated credits for one call
    pub fn estimate(&self, operation: OperationType, pages: usize, content_length: usize) -> f64 {
        let base = match operation {
            OperationType::Search => self.search,
            OperationType::Extract => self.extract,
            OperationType::Crawl => self.crawl_per_page * pages as f64,
        };
        base + self.per_1k_chars * content_length as f64 / 1000.0
    }
}

/// Per-run table of provider prices
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CostTable {
    pub providers: HashMap<String, ProviderCost>,
}

impl CostTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_provider(mut self, provider: impl Into<String>, cost: ProviderCost) -> Self {
        self.providers.insert(provider.into(), cost);
        self
    }

    pub fn get(&self, provider: &str) -> Option<&ProviderCost> {
        self.providers.get(provider)
    }

    /// Credits charged for a call and whether the figure was reported by the provider
    ///
    /// Providers missing from the table cost nothing when they do not report usage.
    pub fn resolve(
        &self,
        provider: &str,
        operation: OperationType,
        usage: Usage,
        pages: usize,
        content_length: usize,
    ) -> (f64, bool) {
        match usage.credits {
            Some(credits) => (credits, true),
            None => {
                let estimated = self
                    .get(provider)
                    .map(|cost| cost.estimate(operation, pages, content_length))
                    .unwrap_or(0.0);
                (estimated, false)
            }
        }
    }
}
