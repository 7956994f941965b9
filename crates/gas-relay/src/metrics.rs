//! Prometheus metrics for the gas relay.

use reth_metrics::{
    Metrics,
    metrics::{Counter, Gauge, Histogram},
};

/// Gas relay metrics
#[derive(Metrics, Clone)]
#[metrics(scope = "gas_relay")]
pub struct RelayMetrics {
    /// Number of deposits at or above the threshold
    pub deposits_detected: Counter,

    /// Number of deposits below the threshold
    pub deposits_below_threshold: Counter,

    /// Number of logs that failed to decode
    pub decode_failures: Counter,

    /// Number of confirmed funding transfers
    pub fundings_completed: Counter,

    /// Number of deposits whose recipient already had enough gas
    pub fundings_skipped: Counter,

    /// Number of fundings abandoned after errors or retries
    pub funding_failures: Counter,

    /// Completed poll cycles
    pub poll_cycles: Counter,

    /// Poll cycles aborted by an error
    pub poll_failures: Counter,

    /// Last source block fully processed
    pub checkpoint_block: Gauge,

    /// RPC call latency in seconds
    pub rpc_latency_seconds: Histogram,
}

impl RelayMetrics {
    /// Record a deposit that will be considered for funding
    #[inline]
    pub fn record_deposit_detected(&self) {
        self.deposits_detected.increment(1);
    }

    /// Record a deposit dropped by the threshold
    #[inline]
    pub fn record_deposit_below_threshold(&self) {
        self.deposits_below_threshold.increment(1);
    }

    #[inline]
    pub fn record_decode_failure(&self) {
        self.decode_failures.increment(1);
    }

    #[inline]
    pub fn record_funding_completed(&self) {
        self.fundings_completed.increment(1);
    }

    #[inline]
    pub fn record_funding_skipped(&self) {
        self.fundings_skipped.increment(1);
    }

    #[inline]
    pub fn record_funding_failure(&self) {
        self.funding_failures.increment(1);
    }

    /// Record a successful poll cycle and the new checkpoint
    #[inline]
    pub fn record_poll_cycle(&self, checkpoint: u64) {
        self.poll_cycles.increment(1);
        self.checkpoint_block.set(checkpoint as f64);
    }

    #[inline]
    pub fn record_poll_failure(&self) {
        self.poll_failures.increment(1);
    }

    /// Record RPC latency
    #[inline]
    pub fn record_rpc_latency(&self, duration_secs: f64) {
        self.rpc_latency_seconds.record(duration_secs);
    }
}
