//! Tempo Core functionality.
//!
//! This crate contains the cluster state and the node selection engine that
//! steer every request toward the backend with the lowest observed average
//! response time. It performs no I/O; transports call into it around each
//! upstream exchange.

pub mod counters;
pub mod domain;
pub mod error;
pub mod load_balancer;

pub use domain::cluster::{ClusterState, NodeStats, SharedClusterState};
pub use domain::node::Node;
pub use error::{ClusterError, ClusterResult};
pub use load_balancer::selector::{NodeSelector, Selection, SelectionPolicy};
