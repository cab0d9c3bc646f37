//! Benchmark configuration
//!
//! Every section has a `Default` and can be loaded from TOML or JSON. Durations are
//! written in milliseconds (`timeout_ms = 30000`).

use crate::cost::CostTable;
use crate::ratelimit::MIN_RATE_PER_SECOND;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}

/// How provider options are chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkMode {
    /// Each provider runs with its own defaults
    Native,
    /// Options are aligned across providers for an apples-to-apples comparison
    #[default]
    Normalized,
}

/// What to do with emulated capabilities in normalized mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CapabilityPolicy {
    /// Skip emulated operations
    Strict,
    /// Run them and tag the result as emulated
    #[default]
    Tagged,
}

/// Retry/backoff configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (total attempts = max_retries + 1)
    pub max_retries: u32,

    #[serde(rename = "initial_backoff_ms", with = "duration_ms")]
    pub initial_backoff: Duration,

    #[serde(rename = "max_backoff_ms", with = "duration_ms")]
    pub max_backoff: Duration,

    /// Multiplier applied per retry
    pub backoff_factor: f64,

    /// Apply ±25% uniform jitter to computed backoff
    pub jitter: bool,

    /// HTTP statuses that are worth retrying
    pub retryable_statuses: Vec<u16>,

    /// Upper bound for server-provided `Retry-After` hints
    #[serde(rename = "max_retry_after_ms", with = "duration_ms")]
    pub max_retry_after: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: true,
            retryable_statuses: vec![429, 500, 502, 503, 504],
            max_retry_after: Duration::from_secs(60),
        }
    }
}

impl RetryConfig {
    /// Validate the retry configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any configuration value is invalid
    pub fn validate(&self) -> Result<()> {
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(Error::Config(format!(
                "backoff_factor must be >= 1.0, got {}",
                self.backoff_factor
            )));
        }

        if self.initial_backoff > self.max_backoff {
            return Err(Error::Config(
                "initial_backoff must not exceed max_backoff".to_string(),
            ));
        }

        Ok(())
    }
}

/// Requests-per-second limits keyed by provider name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Rate for providers without an explicit entry
    pub default_rps: f64,

    pub per_provider: HashMap<String, f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_rps: 5.0,
            per_provider: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    /// Reject rates a limiter cannot pace
    ///
    /// Non-positive rates stay valid and fall back to one request per second.
    pub fn validate(&self) -> Result<()> {
        let rates = std::iter::once(("default_rps", self.default_rps))
            .chain(self.per_provider.iter().map(|(name, rate)| (name.as_str(), *rate)));
        for (name, rate) in rates {
            if !rate.is_finite() || (rate > 0.0 && rate < MIN_RATE_PER_SECOND) {
                return Err(Error::Config(format!(
                    "rate limit '{}' must be a finite rate of at least {} rps, got {}",
                    name, MIN_RATE_PER_SECOND, rate
                )));
            }
        }
        Ok(())
    }
}

/// Weights of the search quality sub-scores
///
/// Only the ratios matter: the overall score is divided by the sum of the weights
/// of the signals that were actually available.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    pub semantic: f64,
    pub reranker: f64,
    pub top_k: f64,
    pub diversity: f64,
    pub authority: f64,
    pub freshness: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            semantic: 0.30,
            reranker: 0.25,
            top_k: 0.15,
            diversity: 0.10,
            authority: 0.10,
            freshness: 0.10,
        }
    }
}

impl QualityWeights {
    fn all(&self) -> [(&'static str, f64); 6] {
        [
            ("semantic", self.semantic),
            ("reranker", self.reranker),
            ("top_k", self.top_k),
            ("diversity", self.diversity),
            ("authority", self.authority),
            ("freshness", self.freshness),
        ]
    }

    pub fn total(&self) -> f64 {
        self.all().iter().map(|(_, w)| w).sum()
    }

    /// # Errors
    ///
    /// Returns [`Error::Config`] for negative or non-finite weights, or a zero total
    pub fn validate(&self) -> Result<()> {
        for (name, weight) in self.all() {
            if !weight.is_finite() || weight < 0.0 {
                return Err(Error::Config(format!(
                    "quality weight '{}' must be a non-negative number, got {}",
                    name, weight
                )));
            }
        }

        if self.total() <= 0.0 {
            return Err(Error::Config("quality weights must sum to a positive total".to_string()));
        }

        Ok(())
    }
}

/// Embedding cache sizing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingCacheConfig {
    /// Maximum number of cached vectors (0 disables caching)
    pub capacity: usize,

    #[serde(rename = "ttl_ms", with = "duration_ms")]
    pub ttl: Duration,
}

impl Default for EmbeddingCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            ttl: Duration::from_secs(3600),
        }
    }
}

/// Quality scoring configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Score successful operations
    pub enabled: bool,

    pub weights: QualityWeights,

    /// Number of leading results considered by the top-K, semantic and reranker signals
    pub top_k: usize,

    /// Requested embedding dimensionality (`None` = model default)
    pub embedding_dimensions: Option<usize>,

    /// Ask the embedding service for unit-length vectors
    pub normalize_embeddings: bool,

    pub cache: EmbeddingCacheConfig,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            weights: QualityWeights::default(),
            top_k: 5,
            embedding_dimensions: None,
            normalize_embeddings: true,
            cache: EmbeddingCacheConfig::default(),
        }
    }
}

/// Configuration for benchmark runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Maximum number of in-flight units across all providers
    pub concurrency: usize,

    /// Optional tighter bound per provider
    pub per_provider_concurrency: Option<usize>,

    /// Deadline for each unit
    #[serde(rename = "timeout_ms", with = "duration_ms")]
    pub timeout: Duration,

    pub mode: BenchmarkMode,

    pub capability_policy: CapabilityPolicy,

    /// Number of times every (test, provider) pair is executed
    pub repeats: usize,

    /// Output directory for reports
    pub output_dir: PathBuf,

    /// Result count requested from every provider in normalized mode
    pub normalized_max_results: usize,

    pub retry: RetryConfig,

    pub rate_limits: RateLimitConfig,

    pub quality: QualityConfig,

    pub costs: CostTable,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get(),
            per_provider_concurrency: None,
            timeout: Duration::from_secs(60),
            mode: BenchmarkMode::default(),
            capability_policy: CapabilityPolicy::default(),
            repeats: 1,
            output_dir: PathBuf::from("results"),
            normalized_max_results: 10,
            retry: RetryConfig::default(),
            rate_limits: RateLimitConfig::default(),
            quality: QualityConfig::default(),
            costs: CostTable::default(),
        }
    }
}

impl BenchmarkConfig {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if any configuration value is invalid
    pub fn validate(&self) -> Result<()> {
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be > 0".to_string()));
        }

        if self.concurrency == 0 {
            return Err(Error::Config("concurrency must be > 0".to_string()));
        }

        if self.per_provider_concurrency == Some(0) {
            return Err(Error::Config("per_provider_concurrency must be > 0".to_string()));
        }

        if self.repeats == 0 {
            return Err(Error::Config("repeats must be > 0".to_string()));
        }

        if self.normalized_max_results == 0 {
            return Err(Error::Config("normalized_max_results must be > 0".to_string()));
        }

        self.retry.validate()?;
        self.rate_limits.validate()?;
        self.quality.weights.validate()?;

        Ok(())
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file cannot be read or is invalid TOML.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        toml::from_str(&content).map_err(|e| Error::Config(format!("Invalid TOML in {}: {}", path.display(), e)))
    }

    /// Load configuration from a JSON file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        serde_json::from_str(&content).map_err(|e| Error::Config(format!("Invalid JSON in {}: {}", path.display(), e)))
    }

    /// Load by file extension (`.toml` or `.json`)
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Self::from_toml_file(path),
            Some("json") => Self::from_json_file(path),
            other => Err(Error::Config(format!(
                "unsupported config format {:?} for {}",
                other,
                path.display()
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = BenchmarkConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.mode, BenchmarkMode::Normalized);
        assert_eq!(config.capability_policy, CapabilityPolicy::Tagged);
        assert_eq!(config.retry.retryable_statuses, vec![429, 500, 502, 503, 504]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = BenchmarkConfig {
            concurrency: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BenchmarkConfig {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BenchmarkConfig {
            per_provider_concurrency: Some(0),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = BenchmarkConfig {
            repeats: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_weights_must_be_positive_in_total() {
        let zero = QualityWeights {
            semantic: 0.0,
            reranker: 0.0,
            top_k: 0.0,
            diversity: 0.0,
            authority: 0.0,
            freshness: 0.0,
        };
        assert!(zero.validate().is_err());

        let negative = QualityWeights {
            semantic: -1.0,
            ..Default::default()
        };
        assert!(negative.validate().is_err());

        assert!((QualityWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_retry_config_validation() {
        let config = RetryConfig {
            backoff_factor: 0.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RetryConfig {
            initial_backoff: Duration::from_secs(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_limit_validation() {
        let mut config = BenchmarkConfig::default();
        config.rate_limits.default_rps = 0.0;
        assert!(config.validate().is_ok());

        config.rate_limits.per_provider.insert("exa".to_string(), 1e-30);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("'exa'"));

        config.rate_limits.per_provider.insert("exa".to_string(), 2.0);
        config.rate_limits.default_rps = f64::NAN;
        assert!(config.validate().unwrap_err().to_string().contains("default_rps"));

        config.rate_limits.default_rps = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_toml_file() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("searchbench.toml");

        fs::write(
            &config_path,
            r#"
concurrency = 4
per_provider_concurrency = 2
timeout_ms = 15000
mode = "native"
capability_policy = "strict"
repeats = 3

[retry]
max_retries = 1
initial_backoff_ms = 100

[rate_limits]
default_rps = 2.0

[rate_limits.per_provider]
exa = 0.5

[quality.weights]
semantic = 0.5
reranker = 0.5

[costs.providers.exa]
search = 0.005
        "#,
        )
        .unwrap();

        let config = BenchmarkConfig::from_toml_file(&config_path).unwrap();
        assert_eq!(config.concurrency, 4);
        assert_eq!(config.per_provider_concurrency, Some(2));
        assert_eq!(config.timeout, Duration::from_secs(15));
        assert_eq!(config.mode, BenchmarkMode::Native);
        assert_eq!(config.capability_policy, CapabilityPolicy::Strict);
        assert_eq!(config.repeats, 3);
        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.initial_backoff, Duration::from_millis(100));
        assert_eq!(config.retry.max_backoff, Duration::from_secs(30));
        assert_eq!(config.rate_limits.per_provider.get("exa"), Some(&0.5));
        assert_eq!(config.quality.weights.semantic, 0.5);
        assert_eq!(config.quality.weights.top_k, 0.15);
        assert!(config.costs.providers.contains_key("exa"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_file_dispatches_on_extension() {
        let dir = tempdir().unwrap();
        let json_path = dir.path().join("bench.json");
        fs::write(&json_path, r#"{"concurrency": 3, "timeout_ms": 500}"#).unwrap();

        let config = BenchmarkConfig::from_file(&json_path).unwrap();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.timeout, Duration::from_millis(500));

        let yaml_path = dir.path().join("bench.yaml");
        fs::write(&yaml_path, "concurrency: 3").unwrap();
        assert!(BenchmarkConfig::from_file(&yaml_path).is_err());
    }

    #[test]
    fn test_invalid_toml_reports_path() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("broken.toml");
        fs::write(&config_path, "concurrency = [").unwrap();

        let err = BenchmarkConfig::from_toml_file(&config_path).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
