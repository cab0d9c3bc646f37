//! External signal services: text embeddings and reranking
//!
//! Both are consumed through traits so tests and alternative backends can stand in
//! for the HTTP implementations. HTTP calls go through [`RetryPolicy`].

use crate::cache::{EmbeddingCache, EmbeddingKey};
use crate::retry::RetryPolicy;
use crate::{Error, Result};
use ahash::AHashMap;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A batch embedding request
///
/// `request_id` and `timeout` affect transport only and are not part of the cache key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
    pub dimensions: Option<usize>,
    pub normalize: bool,
    pub request_id: Option<String>,
    pub timeout: Option<Duration>,
}

impl EmbeddingRequest {
    pub fn new(texts: Vec<String>, dimensions: Option<usize>, normalize: bool) -> Self {
        Self {
            texts,
            dimensions,
            normalize,
            ..Default::default()
        }
    }

    /// Cache keys for every text, in request order
    pub fn cache_keys(&self) -> Vec<EmbeddingKey> {
        self.texts
            .iter()
            .map(|text| EmbeddingKey::new(text.clone(), self.dimensions, self.normalize))
            .collect()
    }
}

/// Produces one vector per input text
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn name(&self) -> &str;

    /// Embed every text in `request`, preserving order
    async fn embed(&self, cancel: &CancellationToken, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>>;
}

/// Scores documents for relevance to a query
#[async_trait]
pub trait Reranker: Send + Sync {
    fn name(&self) -> &str;

    /// Relevance in `[0, 1]` for each document, in input order
    async fn rerank(&self, cancel: &CancellationToken, query: &str, documents: &[String]) -> Result<Vec<f64>>;
}

#[derive(Debug, Serialize)]
struct EmbeddingBody<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    normalize: bool,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// OpenAI-compatible `/embeddings` client
#[derive(Debug, Clone)]
pub struct HttpEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl HttpEmbeddingService {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            retry,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl EmbeddingService for HttpEmbeddingService {
    fn name(&self) -> &str {
        &self.model
    }

    async fn embed(&self, cancel: &CancellationToken, request: &EmbeddingRequest) -> Result<Vec<Vec<f32>>> {
        if request.texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = self.client.post(&self.endpoint).json(&EmbeddingBody {
            model: &self.model,
            input: &request.texts,
            dimensions: request.dimensions,
            normalize: request.normalize,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        if let Some(id) = &request.request_id {
            builder = builder.header("x-request-id", id);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        let response = self.retry.do_http_request_detailed(cancel, builder).await?;
        let mut parsed: EmbeddingResponse = response.json()?;

        if parsed.data.len() != request.texts.len() {
            return Err(Error::Embedding(format!(
                "expected {} embeddings, got {}",
                request.texts.len(),
                parsed.data.len()
            )));
        }

        if parsed.data.iter().all(|d| d.index.is_some()) {
            parsed.data.sort_by_key(|d| d.index);
        }

        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Debug, Serialize)]
struct RerankBody<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
}

#[derive(Debug, Deserialize)]
struct RerankResponse {
    results: Vec<RerankResult>,
}

#[derive(Debug, Deserialize)]
struct RerankResult {
    index: usize,
    relevance_score: f64,
}

/// Cohere/Jina-style `/rerank` client
#[derive(Debug, Clone)]
pub struct HttpReranker {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    retry: RetryPolicy,
}

impl HttpReranker {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            retry,
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }
}

#[async_trait]
impl Reranker for HttpReranker {
    fn name(&self) -> &str {
        &self.model
    }

    async fn rerank(&self, cancel: &CancellationToken, query: &str, documents: &[String]) -> Result<Vec<f64>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder = self.client.post(&self.endpoint).json(&RerankBody {
            model: &self.model,
            query,
            documents,
        });
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = self.retry.do_http_request_detailed(cancel, builder).await?;
        let parsed: RerankResponse = response.json()?;

        let mut scores = vec![0.0; documents.len()];
        for result in parsed.results {
            let slot = scores
                .get_mut(result.index)
                .ok_or_else(|| Error::Embedding(format!("rerank index {} out of range", result.index)))?;
            *slot = result.relevance_score.clamp(0.0, 1.0);
        }
        Ok(scores)
    }
}

/// Embedding service fronted by an [`EmbeddingCache`]
///
/// Cache misses for one call are sent to the service as a single batch.
#[derive(Clone)]
pub struct CachedEmbedder {
    service: Arc<dyn EmbeddingService>,
    cache: Arc<EmbeddingCache>,
    dimensions: Option<usize>,
    normalize: bool,
}

impl CachedEmbedder {
    pub fn new(service: Arc<dyn EmbeddingService>, cache: Arc<EmbeddingCache>) -> Self {
        Self {
            service,
            cache,
            dimensions: None,
            normalize: true,
        }
    }

    pub fn with_options(mut self, dimensions: Option<usize>, normalize: bool) -> Self {
        self.dimensions = dimensions;
        self.normalize = normalize;
        self
    }

    pub fn cache(&self) -> &Arc<EmbeddingCache> {
        &self.cache
    }

    /// Vectors for `texts` in order, fetching only what the cache lacks
    pub async fn embed(&self, cancel: &CancellationToken, texts: &[String]) -> Result<Vec<Arc<[f32]>>> {
        let keys: Vec<EmbeddingKey> = texts
            .iter()
            .map(|text| EmbeddingKey::new(text.clone(), self.dimensions, self.normalize))
            .collect();

        let mut vectors: Vec<Option<Arc<[f32]>>> = keys.iter().map(|key| self.cache.get(key)).collect();

        // Deduplicated misses, each mapped to the positions waiting on it
        let mut pending: AHashMap<&str, Vec<usize>> = AHashMap::new();
        let mut missing: Vec<String> = Vec::new();
        for (pos, text) in texts.iter().enumerate() {
            if vectors[pos].is_some() {
                continue;
            }
            let waiting = pending.entry(text.as_str()).or_default();
            if waiting.is_empty() {
                missing.push(text.clone());
            }
            waiting.push(pos);
        }

        if !missing.is_empty() {
            tracing::debug!(
                service = self.service.name(),
                hits = texts.len() - pending.values().map(Vec::len).sum::<usize>(),
                misses = missing.len(),
                "embedding cache lookup"
            );

            let request = EmbeddingRequest::new(missing, self.dimensions, self.normalize);
            let fetched = self.service.embed(cancel, &request).await?;
            if fetched.len() != request.texts.len() {
                return Err(Error::Embedding(format!(
                    "{} returned {} vectors for {} texts",
                    self.service.name(),
                    fetched.len(),
                    request.texts.len()
                )));
            }

            for ((text, key), vector) in request.texts.iter().zip(request.cache_keys()).zip(fetched) {
                let vector: Arc<[f32]> = vector.into();
                self.cache.set(key, Arc::clone(&vector));
                if let Some(positions) = pending.get(text.as_str()) {
                    for &pos in positions {
                        vectors[pos] = Some(Arc::clone(&vector));
                    }
                }
            }
        }

        vectors
            .into_iter()
            .map(|v| v.ok_or_else(|| Error::Embedding("missing embedding after fetch".to_string())))
            .collect()
    }
}

/// Cosine similarity of two vectors; `None` for mismatched or zero-length input
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }

    let (mut dot, mut norm_a, mut norm_b) = (0.0f64, 0.0f64, 0.0f64);
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}
