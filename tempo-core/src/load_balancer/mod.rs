//! Latency-driven node selection.

pub mod selector;
