//! Backend node models.

use crate::counters::Counter64;

/// Baseline value of both per-node counters after construction or a reset.
///
/// Keeping the request count at one means the average never divides by zero.
pub const STATS_BASELINE: u64 = 1;

/// Represents a single upstream node and its accumulated latency statistics.
#[derive(Debug)]
pub struct Node {
    /// The `host:port` the node is reached at.
    pub address: String,
    /// Whether upstream connections to this node must use TLS.
    pub requires_tls: bool,
    request_count: Counter64,
    response_time_total: Counter64,
}

impl Node {
    /// Create a node with baseline statistics.
    pub fn new(address: impl Into<String>, requires_tls: bool) -> Self {
        Self {
            address: address.into(),
            requires_tls,
            request_count: Counter64::new(STATS_BASELINE),
            response_time_total: Counter64::new(STATS_BASELINE),
        }
    }

    /// Number of recorded requests, baseline included.
    pub fn request_count(&self) -> u64 {
        self.request_count.get()
    }

    /// Sum of recorded response times in milliseconds, baseline included.
    pub fn response_time_total(&self) -> u64 {
        self.response_time_total.get()
    }

    /// Integer average response time in milliseconds.
    ///
    /// The two counters are read independently, so under concurrent updates
    /// the result may mix a count and a total from slightly different moments.
    pub fn average_response_time(&self) -> u64 {
        self.response_time_total.get() / self.request_count.get()
    }

    /// Account for one completed exchange that took `response_time_ms`.
    pub(crate) fn record(&self, response_time_ms: u64) {
        self.request_count.add(1);
        self.response_time_total.add(response_time_ms);
    }

    /// Drop accumulated statistics back to the baseline.
    pub(crate) fn reset_stats(&self) {
        self.request_count.set(STATS_BASELINE);
        self.response_time_total.set(STATS_BASELINE);
    }
}
