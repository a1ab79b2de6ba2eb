//! Pure order-key arithmetic: allocation and rebalance detection.
//!
//! # Responsibility
//! - Compute integer order keys without touching storage.
//! - Decide when a scope's key spacing has degraded enough to rebalance.
//!
//! # Invariants
//! - Nothing in this module performs I/O or holds state.
//! - All tunables travel through `OrderConfig`; there are no globals.

pub mod allocator;
pub mod detector;

/// Reserved order value marking legacy rows that never received a key.
pub const UNINITIALIZED_ORDER: i64 = 0;

/// Tunables for key allocation and rebalance detection.
///
/// Defaults match the production constants (initial key 1000, spacing
/// 100). The irregularity threshold is a preventive heuristic, not a
/// correctness constraint; callers may tune it freely.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderConfig {
    /// Key assigned to the first item of an empty scope.
    pub initial_key: i64,
    /// Gap left between appended neighbors.
    pub spacing: i64,
    /// Ceiling for order keys; appends past it force a rebalance.
    pub max_key: i64,
    /// Largest tolerated max-gap/min-gap ratio before rebalancing.
    pub irregularity_threshold: i64,
}

impl Default for OrderConfig {
    fn default() -> Self {
        Self {
            initial_key: 1000,
            spacing: 100,
            max_key: 1 << 60,
            irregularity_threshold: 100,
        }
    }
}
