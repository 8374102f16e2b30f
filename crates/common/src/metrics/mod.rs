//! Metrics and observability utilities
//!
//! Prometheus metrics through the `metrics` facade with standardized
//! naming, plus an injected in-process analytics accumulator
//! ([`RetrievalStats`]) for the stats endpoint.

mod stats;

pub use stats::{RetrievalStats, RetrievalStatsSnapshot};

use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use std::time::Instant;

/// Metrics prefix for all CiteForge metrics
pub const METRICS_PREFIX: &str = "citeforge";

/// Histogram buckets for retrieval latency (in seconds)
pub const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500, 5.000, 10.00,
];

/// Register all metric descriptions
pub fn register_metrics() {
    describe_counter!(
        format!("{}_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Total number of HTTP requests"
    );

    describe_histogram!(
        format!("{}_request_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "HTTP request latency in seconds"
    );

    describe_counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        Unit::Count,
        "Completed retrievals by winning tier"
    );

    describe_histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        Unit::Seconds,
        "End-to-end retrieval latency in seconds"
    );

    describe_counter!(
        format!("{}_sub_queries_total", METRICS_PREFIX),
        Unit::Count,
        "Index sub-queries by index and outcome"
    );

    describe_counter!(
        format!("{}_tier_fallbacks_total", METRICS_PREFIX),
        Unit::Count,
        "Tier attempts that yielded no usable hit"
    );

    describe_counter!(
        format!("{}_gate_decisions_total", METRICS_PREFIX),
        Unit::Count,
        "Relevance gate decisions by status"
    );

    describe_counter!(
        format!("{}_carried_hits_total", METRICS_PREFIX),
        Unit::Count,
        "Blended hits that came from carry-over"
    );

    describe_counter!(
        format!("{}_carry_over_evictions_total", METRICS_PREFIX),
        Unit::Count,
        "Conversation sources evicted from carry-over"
    );

    describe_counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        Unit::Count,
        "Query embedding requests"
    );

    tracing::info!("Metrics registered");
}

/// Helper to record request metrics
pub struct RequestMetrics {
    start: Instant,
    endpoint: String,
    method: String,
}

impl RequestMetrics {
    /// Start tracking a request
    pub fn start(method: &str, endpoint: &str) -> Self {
        Self {
            start: Instant::now(),
            endpoint: endpoint.to_string(),
            method: method.to_string(),
        }
    }

    /// Record request completion
    pub fn finish(self, status: u16) {
        let duration = self.start.elapsed().as_secs_f64();

        counter!(
            format!("{}_requests_total", METRICS_PREFIX),
            "method" => self.method.clone(),
            "endpoint" => self.endpoint.clone(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            format!("{}_request_duration_seconds", METRICS_PREFIX),
            "method" => self.method,
            "endpoint" => self.endpoint
        )
        .record(duration);
    }
}

/// Record one completed retrieval
pub fn record_retrieval(duration_secs: f64, tier: &str, hit_count: usize) {
    counter!(
        format!("{}_retrievals_total", METRICS_PREFIX),
        "tier" => tier.to_string(),
        "empty" => (hit_count == 0).to_string()
    )
    .increment(1);

    histogram!(
        format!("{}_retrieval_duration_seconds", METRICS_PREFIX),
        "tier" => tier.to_string()
    )
    .record(duration_secs);
}

/// Record the outcome of one index sub-query
pub fn record_sub_query(index: &str, status: &str) {
    counter!(
        format!("{}_sub_queries_total", METRICS_PREFIX),
        "index" => index.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a tier that fell through to the next one
pub fn record_tier_fallback(tier: &str) {
    counter!(
        format!("{}_tier_fallbacks_total", METRICS_PREFIX),
        "tier" => tier.to_string()
    )
    .increment(1);
}

/// Record a relevance gate decision
pub fn record_gate(status: &str) {
    counter!(
        format!("{}_gate_decisions_total", METRICS_PREFIX),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record carry-over activity of one turn
pub fn record_carry_over(turn_type: &str, carried_hits: usize, evicted: usize) {
    counter!(
        format!("{}_carried_hits_total", METRICS_PREFIX),
        "turn_type" => turn_type.to_string()
    )
    .increment(carried_hits as u64);

    counter!(format!("{}_carry_over_evictions_total", METRICS_PREFIX)).increment(evicted as u64);
}

/// Record a query embedding request
pub fn record_embedding(model: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    counter!(
        format!("{}_embedding_requests_total", METRICS_PREFIX),
        "model" => model.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_buckets_sorted() {
        let mut prev = 0.0;
        for &bucket in LATENCY_BUCKETS {
            assert!(bucket > prev);
            prev = bucket;
        }
    }

    #[test]
    fn test_recorders_without_exporter() {
        // No recorder installed: every call is a no-op.
        let metrics = RequestMetrics::start("POST", "/v1/retrieve");
        metrics.finish(200);
        record_retrieval(0.02, "content-search", 3);
        record_sub_query("lexical", "timed_out");
        record_gate("pass");
        record_carry_over("drill-down", 1, 0);
    }
}
