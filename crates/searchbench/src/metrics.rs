//! Thread-safe result store and per-provider summaries
//!
//! Results are appended from many tasks and read back as copies. Summaries are
//! recomputed from the stored results on every call.

use crate::types::{OperationResult, Summary};
use parking_lot::RwLock;
use std::time::Duration;

/// Calculate percentile from duration values
///
/// # Arguments
/// * `values` - Duration values (will be sorted)
/// * `percentile` - Percentile to calculate (0.0 - 1.0)
fn duration_percentile(mut values: Vec<Duration>, percentile: f64) -> Duration {
    if values.is_empty() {
        return Duration::ZERO;
    }

    values.sort();
    let index = ((values.len() as f64 - 1.0) * percentile).round().max(0.0) as usize;
    values[index.min(values.len() - 1)]
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Append-only collection of [`OperationResult`]s
#[derive(Debug, Default)]
pub struct MetricsCollector {
    results: RwLock<Vec<OperationResult>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_result(&self, result: OperationResult) {
        self.results.write().push(result);
    }

    /// Copy of every result in insertion order
    pub fn results(&self) -> Vec<OperationResult> {
        self.results.read().clone()
    }

    pub fn results_by_provider(&self, provider: &str) -> Vec<OperationResult> {
        self.results
            .read()
            .iter()
            .filter(|r| r.provider == provider)
            .cloned()
            .collect()
    }

    pub fn results_by_test(&self, test_name: &str) -> Vec<OperationResult> {
        self.results
            .read()
            .iter()
            .filter(|r| r.test_name == test_name)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.results.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.read().is_empty()
    }

    /// Provider names in the order their first result arrived
    pub fn providers(&self) -> Vec<String> {
        let results = self.results.read();
        let mut seen: Vec<String> = Vec::new();
        for result in results.iter() {
            if !seen.iter().any(|p| p == &result.provider) {
                seen.push(result.provider.clone());
            }
        }
        seen
    }

    /// Aggregate the results of one provider
    ///
    /// Latency, content length and credit averages cover executed operations;
    /// quality is averaged over successful operations that were scored.
    pub fn compute_summary(&self, provider: &str) -> Summary {
        let results = self.results_by_provider(provider);
        summarize(provider, &results)
    }

    /// One summary per provider, in first-seen order
    pub fn summaries(&self) -> Vec<Summary> {
        self.providers().iter().map(|p| self.compute_summary(p)).collect()
    }
}

fn summarize(provider: &str, results: &[OperationResult]) -> Summary {
    let mut summary = Summary {
        provider: provider.to_string(),
        total: results.len(),
        ..Default::default()
    };

    if results.is_empty() {
        return summary;
    }

    let executed: Vec<&OperationResult> = results.iter().filter(|r| !r.skipped).collect();
    summary.skipped_count = results.len() - executed.len();
    summary.success_count = executed.iter().filter(|r| r.success).count();
    summary.failure_count = executed.len() - summary.success_count;

    if executed.is_empty() {
        return summary;
    }

    summary.success_rate = summary.success_count as f64 / executed.len() as f64;

    let latencies: Vec<Duration> = executed.iter().map(|r| r.latency).collect();
    summary.min_latency = latencies.iter().min().copied().unwrap_or_default();
    summary.max_latency = latencies.iter().max().copied().unwrap_or_default();
    let total_latency: Duration = latencies.iter().sum();
    summary.avg_latency = total_latency / latencies.len() as u32;
    summary.p50_latency = duration_percentile(latencies.clone(), 0.50);
    summary.p95_latency = duration_percentile(latencies, 0.95);

    for result in &executed {
        summary.total_credits += result.credits_used;
        if result.usage_reported {
            summary.reported_credits += result.credits_used;
        } else {
            summary.estimated_credits += result.credits_used;
        }
    }
    summary.avg_credits = summary.total_credits / executed.len() as f64;

    summary.avg_content_length = mean(executed.iter().map(|r| r.content_length as f64)).unwrap_or(0.0);
    summary.avg_quality_score = mean(
        executed
            .iter()
            .filter(|r| r.success)
            .filter_map(|r| r.quality_score),
    );

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TestSpec;
    use std::sync::Arc;

    fn result(provider: &str, test: &str, latency_ms: u64, success: bool) -> OperationResult {
        let spec = TestSpec::search(test, "query");
        let mut result = OperationResult::pending(&spec, provider, 0);
        result.latency = Duration::from_millis(latency_ms);
        if success {
            result.mark_succeeded();
        } else {
            result.mark_failed(&crate::Error::Timeout("deadline".into()));
        }
        result
    }

    #[test]
    fn test_empty_summary_is_zeroed() {
        let collector = MetricsCollector::new();
        let summary = collector.compute_summary("missing");
        assert_eq!(summary.total, 0);
        assert_eq!(summary.success_rate, 0.0);
        assert_eq!(summary.avg_latency, Duration::ZERO);
        assert!(summary.avg_quality_score.is_none());
    }

    #[test]
    fn test_summary_counts_and_latency() {
        let collector = MetricsCollector::new();
        for (i, ms) in [100, 200, 300, 400].iter().enumerate() {
            collector.add_result(result("exa", &format!("t{i}"), *ms, i != 3));
        }

        let mut skipped = result("exa", "t4", 0, false);
        skipped.mark_skipped("unsupported");
        collector.add_result(skipped);

        let summary = collector.compute_summary("exa");
        assert_eq!(summary.total, 5);
        assert_eq!(summary.success_count, 3);
        assert_eq!(summary.failure_count, 1);
        assert_eq!(summary.skipped_count, 1);
        assert!((summary.success_rate - 0.75).abs() < 1e-9);
        assert_eq!(summary.min_latency, Duration::from_millis(100));
        assert_eq!(summary.max_latency, Duration::from_millis(400));
        assert_eq!(summary.avg_latency, Duration::from_millis(250));
        assert_eq!(summary.p95_latency, Duration::from_millis(400));
    }

    #[test]
    fn test_credits_split_reported_and_estimated() {
        let collector = MetricsCollector::new();

        let mut reported = result("tavily", "a", 10, true);
        reported.credits_used = 2.0;
        reported.usage_reported = true;
        collector.add_result(reported);

        let mut estimated = result("tavily", "b", 10, true);
        estimated.credits_used = 1.0;
        collector.add_result(estimated);

        let summary = collector.compute_summary("tavily");
        assert_eq!(summary.total_credits, 3.0);
        assert_eq!(summary.reported_credits, 2.0);
        assert_eq!(summary.estimated_credits, 1.0);
        assert_eq!(summary.avg_credits, 1.5);
    }

    #[test]
    fn test_quality_average_ignores_unscored() {
        let collector = MetricsCollector::new();
        let mut scored = result("exa", "a", 10, true);
        scored.quality_score = Some(80.0);
        collector.add_result(scored);
        collector.add_result(result("exa", "b", 10, true));

        assert_eq!(collector.compute_summary("exa").avg_quality_score, Some(80.0));
    }

    #[test]
    fn test_filters_and_provider_order() {
        let collector = MetricsCollector::new();
        collector.add_result(result("b", "t1", 10, true));
        collector.add_result(result("a", "t1", 10, true));
        collector.add_result(result("b", "t2", 10, true));

        assert_eq!(collector.providers(), vec!["b".to_string(), "a".to_string()]);
        assert_eq!(collector.results_by_provider("b").len(), 2);
        assert_eq!(collector.results_by_test("t1").len(), 2);
        assert_eq!(collector.summaries().len(), 2);
    }

    #[test]
    fn test_concurrent_appends() {
        let collector = Arc::new(MetricsCollector::new());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let collector = Arc::clone(&collector);
                std::thread::spawn(move || {
                    for i in 0..100 {
                        collector.add_result(result("p", &format!("{t}-{i}"), 1, true));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(collector.len(), 800);
    }

    #[test]
    fn test_percentile() {
        let values: Vec<Duration> = (1..=100).map(Duration::from_millis).collect();
        assert_eq!(duration_percentile(values.clone(), 0.5), Duration::from_millis(51));
        assert_eq!(duration_percentile(values, 0.95), Duration::from_millis(95));
        assert_eq!(duration_percentile(vec![], 0.5), Duration::ZERO);
    }
}
