//! Node selection engine.
//!
//! Every request asks [`NodeSelector::select_node`] for a node and reports the
//! measured latency back through [`NodeSelector::record_outcome`]. Neither call
//! takes a lock. Every `selection_period` requests the selector re-elects the
//! node with the lowest average response time; that recalculation is the only
//! locked section and runs at most once per epoch no matter how many requests
//! race into it.

use std::sync::PoisonError;

use tracing::debug;

use crate::domain::cluster::SharedClusterState;

/// The epoch wraps back to zero once it has reached this value.
pub const EPOCH_WRAP: u32 = 1_000_000;

/// Tuning knobs for the selection cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectionPolicy {
    /// Requests per window; crossing it triggers a recalculation attempt.
    pub selection_period: u64,
    /// Windows between statistics resets.
    pub cleaning_period: u64,
}

/// The node a request was routed to, plus the epoch it was chosen in.
///
/// The epoch must be handed back to [`NodeSelector::record_outcome`] so that
/// measurements taken across a recalculation are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Index into the cluster's node list.
    pub node_index: u32,
    /// Selection epoch observed when the node was chosen.
    pub epoch: u32,
}

/// Chooses nodes and aggregates their latency statistics.
#[derive(Debug, Clone)]
pub struct NodeSelector {
    cluster: SharedClusterState,
    policy: SelectionPolicy,
}

impl NodeSelector {
    /// Create a selector over a shared cluster.
    pub fn new(cluster: SharedClusterState, policy: SelectionPolicy) -> Self {
        Self { cluster, policy }
    }

    /// The cluster this selector drives.
    pub fn cluster(&self) -> &SharedClusterState {
        &self.cluster
    }

    /// The active policy.
    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    /// Pick the node for one inbound request.
    ///
    /// The request that finds the window full runs the threshold logic and is
    /// then counted as the first request of the next window. Several requests
    /// may find the window full at once; the epoch check in
    /// [`recalculate`](Self::recalculate) collapses them into one scan.
    pub fn select_node(&self) -> Selection {
        let state = &*self.cluster;

        if state.requests_since_check.get() >= self.policy.selection_period {
            self.recalculate(state.selection_epoch.get());
            self.age_statistics();
            state.requests_since_check.set(0);
        }
        state.requests_since_check.add(1);

        Selection {
            node_index: state.current_node_index.get(),
            epoch: state.selection_epoch.get(),
        }
    }

    /// Re-elect the node with the lowest average response time.
    ///
    /// Returns `true` only for the caller that actually performed the scan.
    /// Callers holding an epoch that has already moved on return `false`,
    /// either before or after waiting for the lock.
    pub fn recalculate(&self, observed_epoch: u32) -> bool {
        let state = &*self.cluster;

        if observed_epoch != state.selection_epoch.get() {
            return false;
        }

        // The scan cannot panic, a poisoned lock still guards valid state.
        let _guard = state
            .recalculation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let epoch = state.selection_epoch.get();
        if observed_epoch != epoch {
            return false;
        }

        let next_epoch = if epoch >= EPOCH_WRAP { 0 } else { epoch + 1 };
        state.selection_epoch.set(next_epoch);

        // Ties keep the earliest node.
        let (best_index, best_average) = state
            .nodes()
            .iter()
            .map(|node| node.average_response_time())
            .enumerate()
            .min_by_key(|&(_, average)| average)
            .unwrap_or((0, 0));

        // Construction caps the pool at u32::MAX nodes.
        let best_index = best_index as u32;
        state.current_node_index.set(best_index);

        debug!(
            epoch = next_epoch,
            node = best_index,
            average_ms = best_average,
            "recalculated current node"
        );
        true
    }

    /// Count one elapsed window and reset statistics once enough have passed.
    ///
    /// Returns `true` when the reset happened. The reset writes each counter
    /// separately; an outcome recorded in between is harmless.
    pub fn age_statistics(&self) -> bool {
        let state = &*self.cluster;

        if state.stats_age_counter.add(1) < self.policy.cleaning_period {
            return false;
        }

        for node in state.nodes() {
            node.reset_stats();
        }
        state.stats_age_counter.set(0);

        debug!(nodes = state.len(), "reset node statistics");
        true
    }

    /// Report how long an exchange with the selected node took.
    ///
    /// Timeouts are reported too, with the time spent waiting. Measurements
    /// from an older epoch are dropped.
    pub fn record_outcome(&self, response_time_ms: u64, selection: Selection) {
        let state = &*self.cluster;

        if selection.epoch != state.selection_epoch.get() {
            return;
        }
        if let Some(node) = state.node(selection.node_index) {
            node.record(response_time_ms);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::cluster::ClusterState;
    use crate::domain::node::Node;
    use proptest::prelude::*;
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn selector(count: usize, selection_period: u64, cleaning_period: u64) -> NodeSelector {
        let nodes = (0..count)
            .map(|i| Node::new(format!("127.0.0.1:{}", 9001 + i), false))
            .collect();
        let cluster = Arc::new(ClusterState::new(nodes).unwrap());
        NodeSelector::new(
            cluster,
            SelectionPolicy {
                selection_period,
                cleaning_period,
            },
        )
    }

    #[test]
    fn test_first_window_uses_first_node() {
        let selector = selector(3, 3, 10);
        for _ in 0..3 {
            let selection = selector.select_node();
            assert_eq!(selection, Selection { node_index: 0, epoch: 0 });
        }
        assert_eq!(selector.cluster().requests_since_check(), 3);
    }

    #[test]
    fn test_threshold_crossing_starts_new_window() {
        let selector = selector(2, 3, 10);
        for _ in 0..3 {
            let selection = selector.select_node();
            selector.record_outcome(100, selection);
        }

        let selection = selector.select_node();
        assert_eq!(selection, Selection { node_index: 1, epoch: 1 });
        assert_eq!(selector.cluster().requests_since_check(), 1);
        assert_eq!(selector.cluster().stats_age(), 1);
    }

    #[test]
    fn test_recalculate_picks_lowest_average() {
        let selector = selector(3, 1, 10);
        let nodes = selector.cluster().nodes();
        nodes[0].record(300);
        nodes[1].record(20);
        nodes[2].record(80);

        assert!(selector.recalculate(0));
        assert_eq!(selector.cluster().current_node_index(), 1);
        assert_eq!(selector.cluster().selection_epoch(), 1);
    }

    #[test]
    fn test_recalculate_ties_keep_earliest_index() {
        let selector = selector(4, 1, 10);
        selector.cluster().nodes()[0].record(500);

        assert!(selector.recalculate(0));
        assert_eq!(selector.cluster().current_node_index(), 1);
    }

    #[test]
    fn test_recalculate_with_stale_epoch_is_a_no_op() {
        let selector = selector(2, 1, 10);
        selector.cluster().nodes()[0].record(500);

        assert!(selector.recalculate(0));
        selector.cluster().nodes()[1].record(5000);

        assert!(!selector.recalculate(0));
        assert_eq!(selector.cluster().current_node_index(), 1);
        assert_eq!(selector.cluster().selection_epoch(), 1);
    }

    #[test]
    fn test_epoch_wraps_after_reaching_limit() {
        let selector = selector(1, 1, 10);
        selector.cluster().selection_epoch.set(EPOCH_WRAP - 1);

        assert!(selector.recalculate(EPOCH_WRAP - 1));
        assert_eq!(selector.cluster().selection_epoch(), EPOCH_WRAP);

        assert!(selector.recalculate(EPOCH_WRAP));
        assert_eq!(selector.cluster().selection_epoch(), 0);
    }

    #[test]
    fn test_record_outcome_discards_stale_epoch() {
        let selector = selector(2, 1, 10);
        let stale = selector.select_node();
        assert!(selector.recalculate(stale.epoch));

        selector.record_outcome(250, stale);
        let node = &selector.cluster().nodes()[0];
        assert_eq!(node.request_count(), 1);
        assert_eq!(node.response_time_total(), 1);
    }

    #[test]
    fn test_record_outcome_ignores_unknown_node() {
        let selector = selector(1, 1, 10);
        selector.record_outcome(10, Selection { node_index: 7, epoch: 0 });
        assert_eq!(selector.cluster().nodes()[0].request_count(), 1);
    }

    #[test]
    fn test_statistics_reset_at_cleaning_period() {
        let selector = selector(2, 1, 2);
        for node in selector.cluster().nodes() {
            node.record(700);
        }

        assert!(!selector.age_statistics());
        assert_eq!(selector.cluster().stats_age(), 1);
        assert!(selector.age_statistics());
        assert_eq!(selector.cluster().stats_age(), 0);

        for node in selector.cluster().nodes() {
            assert_eq!(node.request_count(), 1);
            assert_eq!(node.response_time_total(), 1);
        }

        let selection = Selection {
            node_index: 1,
            epoch: selector.cluster().selection_epoch(),
        };
        selector.record_outcome(40, selection);
        selector.record_outcome(60, selection);
        let node = &selector.cluster().nodes()[1];
        assert_eq!(node.request_count(), 3);
        assert_eq!(node.response_time_total(), 101);
    }

    #[test]
    fn test_window_sequence_walks_fresh_nodes_then_returns_after_reset() {
        // Mirrors the end-to-end routing scenario: period 3, cleaning 2.
        let selector = selector(8, 3, 2);
        let mut chosen = Vec::new();
        for i in 0..10u64 {
            let selection = selector.select_node();
            chosen.push(selection.node_index);
            selector.record_outcome(100 * (i + 1), selection);
        }
        assert_eq!(chosen, vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 0]);
    }

    #[test]
    fn test_converges_to_fast_node() {
        let selector = selector(2, 1, 1_000);
        let latency = |index: u32| if index == 0 { 4000 } else { 50 };

        let mut slow_selections = 0;
        for _ in 0..50 {
            let selection = selector.select_node();
            if selection.node_index == 0 {
                slow_selections += 1;
            }
            selector.record_outcome(latency(selection.node_index), selection);
        }

        assert_eq!(selector.cluster().current_node_index(), 1);
        assert_eq!(slow_selections, 1);
    }

    #[test]
    fn test_racing_recalculations_scan_exactly_once() {
        const CALLERS: usize = 16;

        for _ in 0..20 {
            let selector = selector(4, 1, 10);
            selector.cluster().nodes()[0].record(900);
            let stale = selector.cluster().selection_epoch();
            let barrier = Arc::new(Barrier::new(CALLERS));

            let handles: Vec<_> = (0..CALLERS)
                .map(|_| {
                    let selector = selector.clone();
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        selector.recalculate(stale)
                    })
                })
                .collect();

            let scans = handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .filter(|ran| *ran)
                .count();

            assert_eq!(scans, 1);
            assert_eq!(selector.cluster().selection_epoch(), stale + 1);
            assert_eq!(selector.cluster().current_node_index(), 1);
        }
    }

    proptest! {
        #[test]
        fn prop_selected_index_is_always_valid(
            count in 1usize..16,
            selection_period in 1u64..5,
            cleaning_period in 1u64..5,
            latencies in proptest::collection::vec(0u64..5_000, 1..200),
        ) {
            let selector = selector(count, selection_period, cleaning_period);
            for latency in latencies {
                let selection = selector.select_node();
                prop_assert!((selection.node_index as usize) < count);
                selector.record_outcome(latency, selection);
                prop_assert!(selector.cluster().nodes().iter().all(|n| n.request_count() >= 1));
            }
        }

        #[test]
        fn prop_outcomes_under_one_epoch_accumulate_exactly(
            count in 1usize..8,
            outcomes in proptest::collection::vec((0u32..8, 0u64..10_000), 0..100),
        ) {
            let selector = selector(count, u64::MAX, u64::MAX);
            let epoch = selector.cluster().selection_epoch();
            let mut expected = vec![(0u64, 0u64); count];

            for (index, latency) in outcomes {
                let index = index % count as u32;
                selector.record_outcome(latency, Selection { node_index: index, epoch });
                expected[index as usize].0 += 1;
                expected[index as usize].1 += latency;
            }

            for (node, (calls, total)) in selector.cluster().nodes().iter().zip(expected) {
                prop_assert_eq!(node.request_count() - 1, calls);
                prop_assert_eq!(node.response_time_total() - 1, total);
            }
        }
    }
}
