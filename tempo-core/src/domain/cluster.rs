//! Shared state describing the node pool and its selection cycle.

use std::sync::{Arc, Mutex};

use crate::counters::{Counter32, Counter64};
use crate::domain::node::Node;
use crate::error::{ClusterError, ClusterResult};

/// Point-in-time view of one node's statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeStats {
    /// Node address.
    pub address: String,
    /// Recorded requests, baseline included.
    pub request_count: u64,
    /// Recorded milliseconds, baseline included.
    pub response_time_total: u64,
    /// Integer average in milliseconds.
    pub average_response_time: u64,
}

/// The node pool plus the counters driving node selection.
///
/// Built once before any listener starts and shared by reference for the rest
/// of the process. Membership never changes after construction.
#[derive(Debug)]
pub struct ClusterState {
    nodes: Box<[Node]>,
    pub(crate) current_node_index: Counter32,
    pub(crate) selection_epoch: Counter32,
    pub(crate) requests_since_check: Counter64,
    pub(crate) stats_age_counter: Counter64,
    /// Serializes recalculations only. Never taken on the request fast path.
    pub(crate) recalculation_lock: Mutex<()>,
}

impl ClusterState {
    /// Build the cluster from an ordered node list.
    ///
    /// The first node starts out selected.
    pub fn new(nodes: Vec<Node>) -> ClusterResult<Self> {
        if nodes.is_empty() {
            return Err(ClusterError::NoNodes);
        }
        if u32::try_from(nodes.len()).is_err() {
            return Err(ClusterError::TooManyNodes(nodes.len()));
        }

        Ok(Self {
            nodes: nodes.into_boxed_slice(),
            current_node_index: Counter32::new(0),
            selection_epoch: Counter32::new(0),
            requests_since_check: Counter64::new(0),
            stats_age_counter: Counter64::new(0),
            recalculation_lock: Mutex::new(()),
        })
    }

    /// All nodes, in configuration order.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Look up a node by index.
    pub fn node(&self, index: u32) -> Option<&Node> {
        self.nodes.get(index as usize)
    }

    /// Number of nodes in the pool.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false; an empty cluster cannot be constructed.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the node currently receiving traffic.
    pub fn current_node_index(&self) -> u32 {
        self.current_node_index.get()
    }

    /// Current selection epoch.
    pub fn selection_epoch(&self) -> u32 {
        self.selection_epoch.get()
    }

    /// Requests counted since the last threshold crossing.
    pub fn requests_since_check(&self) -> u64 {
        self.requests_since_check.get()
    }

    /// Threshold windows elapsed since statistics were last reset.
    pub fn stats_age(&self) -> u64 {
        self.stats_age_counter.get()
    }

    /// Copy out every node's statistics.
    pub fn snapshot(&self) -> Vec<NodeStats> {
        self.nodes
            .iter()
            .map(|node| NodeStats {
                address: node.address.clone(),
                request_count: node.request_count(),
                response_time_total: node.response_time_total(),
                average_response_time: node.average_response_time(),
            })
            .collect()
    }
}

/// A shared reference to the cluster state.
pub type SharedClusterState = Arc<ClusterState>;
