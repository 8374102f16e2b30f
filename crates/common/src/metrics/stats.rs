use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Retrieval analytics for one process.
///
/// Constructed by the service and handed to the engine; tests build their
/// own instance, so no counts leak between them.
#[derive(Debug, Default)]
pub struct RetrievalStats {
    retrievals: AtomicU64,
    exact_lookup: AtomicU64,
    metadata_semantic: AtomicU64,
    content_search: AtomicU64,
    tier_fallbacks: AtomicU64,
    sub_query_failures: AtomicU64,
    sub_query_timeouts: AtomicU64,
    gate_passed: AtomicU64,
    gate_no_evidence: AtomicU64,
    gate_insufficient: AtomicU64,
    carried_hits: AtomicU64,
    evictions: AtomicU64,
    cancelled: AtomicU64,
    latency_ms_total: AtomicU64,
    provenance_scored: AtomicU64,
    provenance_hundredths_total: AtomicU64,
}

/// Point-in-time copy of [`RetrievalStats`]
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RetrievalStatsSnapshot {
    pub retrievals: u64,
    pub exact_lookup: u64,
    pub metadata_semantic: u64,
    pub content_search: u64,
    pub tier_fallbacks: u64,
    pub sub_query_failures: u64,
    pub sub_query_timeouts: u64,
    pub gate_passed: u64,
    pub gate_no_evidence: u64,
    pub gate_insufficient: u64,
    pub carried_hits: u64,
    pub evictions: u64,
    pub cancelled: u64,
    pub average_latency_ms: f64,
    pub provenance_scored: u64,
    pub average_rag_weight: f64,
}

fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

impl RetrievalStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one completed retrieval, keyed by the tier that produced its hits
    pub fn record_retrieval(&self, tier: &str, latency_ms: u64, fallbacks: usize) {
        bump(&self.retrievals, 1);
        bump(&self.latency_ms_total, latency_ms);
        bump(&self.tier_fallbacks, fallbacks as u64);
        match tier {
            "exact-lookup" => bump(&self.exact_lookup, 1),
            "metadata-semantic" => bump(&self.metadata_semantic, 1),
            _ => bump(&self.content_search, 1),
        }
    }

    pub fn record_sub_query_failure(&self, timed_out: bool) {
        if timed_out {
            bump(&self.sub_query_timeouts, 1);
        } else {
            bump(&self.sub_query_failures, 1);
        }
    }

    pub fn record_gate(&self, status: &str) {
        match status {
            "pass" => bump(&self.gate_passed, 1),
            "no_evidence" => bump(&self.gate_no_evidence, 1),
            _ => bump(&self.gate_insufficient, 1),
        }
    }

    pub fn record_carry_over(&self, carried_hits: usize, evicted: usize) {
        bump(&self.carried_hits, carried_hits as u64);
        bump(&self.evictions, evicted as u64);
    }

    pub fn record_cancelled(&self) {
        bump(&self.cancelled, 1);
    }

    pub fn record_provenance(&self, rag_weight: f32) {
        bump(&self.provenance_scored, 1);
        let hundredths = (rag_weight.clamp(0.0, 1.0) * 100.0).round() as u64;
        bump(&self.provenance_hundredths_total, hundredths);
    }

    pub fn snapshot(&self) -> RetrievalStatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        let retrievals = load(&self.retrievals);
        let scored = load(&self.provenance_scored);

        RetrievalStatsSnapshot {
            retrievals,
            exact_lookup: load(&self.exact_lookup),
            metadata_semantic: load(&self.metadata_semantic),
            content_search: load(&self.content_search),
            tier_fallbacks: load(&self.tier_fallbacks),
            sub_query_failures: load(&self.sub_query_failures),
            sub_query_timeouts: load(&self.sub_query_timeouts),
            gate_passed: load(&self.gate_passed),
            gate_no_evidence: load(&self.gate_no_evidence),
            gate_insufficient: load(&self.gate_insufficient),
            carried_hits: load(&self.carried_hits),
            evictions: load(&self.evictions),
            cancelled: load(&self.cancelled),
            average_latency_ms: if retrievals == 0 {
                0.0
            } else {
                load(&self.latency_ms_total) as f64 / retrievals as f64
            },
            provenance_scored: scored,
            average_rag_weight: if scored == 0 {
                0.0
            } else {
                load(&self.provenance_hundredths_total) as f64 / scored as f64 / 100.0
            },
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.retrievals,
            &self.exact_lookup,
            &self.metadata_semantic,
            &self.content_search,
            &self.tier_fallbacks,
            &self.sub_query_failures,
            &self.sub_query_timeouts,
            &self.gate_passed,
            &self.gate_no_evidence,
            &self.gate_insufficient,
            &self.carried_hits,
            &self.evictions,
            &self.cancelled,
            &self.latency_ms_total,
            &self.provenance_scored,
            &self.provenance_hundredths_total,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_averages() {
        let stats = RetrievalStats::new();
        stats.record_retrieval("exact-lookup", 40, 0);
        stats.record_retrieval("content-search", 20, 2);
        stats.record_gate("pass");
        stats.record_gate("insufficient_evidence");
        stats.record_provenance(0.75);
        stats.record_provenance(0.25);

        let snap = stats.snapshot();
        assert_eq!(snap.retrievals, 2);
        assert_eq!(snap.exact_lookup, 1);
        assert_eq!(snap.content_search, 1);
        assert_eq!(snap.tier_fallbacks, 2);
        assert_eq!(snap.gate_passed, 1);
        assert_eq!(snap.gate_insufficient, 1);
        assert!((snap.average_latency_ms - 30.0).abs() < 1e-9);
        assert!((snap.average_rag_weight - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let stats = RetrievalStats::new();
        stats.record_cancelled();
        stats.record_carry_over(3, 1);
        stats.reset();
        assert_eq!(stats.snapshot(), RetrievalStatsSnapshot::default());
    }
}
