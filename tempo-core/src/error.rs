//! Error types for building the cluster.

use thiserror::Error;

/// Errors raised while constructing a [`ClusterState`](crate::domain::cluster::ClusterState).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ClusterError {
    /// The node list was empty.
    #[error("a cluster needs at least one node")]
    NoNodes,

    /// More nodes than a 32-bit index can address.
    #[error("cluster of {0} nodes exceeds the addressable maximum")]
    TooManyNodes(usize),
}

/// Result type for cluster construction.
pub type ClusterResult<T> = Result<T, ClusterError>;
