//! Lock-free integer cells.
//!
//! Every piece of shared mutable state in the cluster is one of these cells.
//! Operations on a single cell are linearizable; nothing is promised about the
//! relative order of operations on different cells.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// A 32-bit atomic counter.
#[derive(Debug, Default)]
pub struct Counter32 {
    value: AtomicU32,
}

impl Counter32 {
    /// Create a counter holding `initial`.
    pub const fn new(initial: u32) -> Self {
        Self {
            value: AtomicU32::new(initial),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> u32 {
        self.value.load(Ordering::Acquire)
    }

    /// Overwrite the current value.
    pub fn set(&self, value: u32) {
        self.value.store(value, Ordering::Release);
    }

    /// Add `delta` and return the value after the addition.
    ///
    /// Wraps on overflow, like the underlying atomic.
    pub fn add(&self, delta: u32) -> u32 {
        self.value
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }
}

/// A 64-bit atomic counter.
#[derive(Debug, Default)]
pub struct Counter64 {
    value: AtomicU64,
}

impl Counter64 {
    /// Create a counter holding `initial`.
    pub const fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    /// Read the current value.
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Overwrite the current value.
    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Release);
    }

    /// Add `delta` and return the value after the addition.
    ///
    /// Wraps on overflow, like the underlying atomic.
    pub fn add(&self, delta: u64) -> u64 {
        self.value
            .fetch_add(delta, Ordering::AcqRel)
            .wrapping_add(delta)
    }
}
