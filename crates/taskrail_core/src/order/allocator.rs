//! Order-key allocation.
//!
//! # Responsibility
//! - Compute a new key that sorts strictly between two neighbors, or
//!   before/after a single boundary neighbor.
//! - Signal `NoGap` whenever no such integer exists, so the caller
//!   rebalances before inserting instead of emitting a colliding key.
//!
//! # Invariants
//! - Functions here are pure and never mutate state.
//! - A returned `Allocation::Key(v)` satisfies `before < v < after`
//!   whenever both neighbors are supplied, and `v >= 1` always.

use crate::order::OrderConfig;

/// Result of one allocation attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    /// A key strictly between the supplied neighbors.
    Key(i64),
    /// No integer fits between the neighbors; the scope must be
    /// rebalanced before this insertion can proceed.
    NoGap,
}

/// Returns the key for appending after the current last key of a scope.
///
/// `None` means the scope is empty and the configured initial key is used.
pub fn next_append_key(last: Option<i64>, cfg: &OrderConfig) -> i64 {
    match last {
        Some(last) => last + cfg.spacing,
        None => cfg.initial_key,
    }
}

/// Computes a key sorting strictly between `before` and `after`.
///
/// Boundary semantics:
/// - both `None`: the scope is empty, use the initial key;
/// - only `after`: prepend with `max(1, after - spacing)`;
/// - only `before`: append with `before + spacing`;
/// - both present with `after - before >= 2`: integer midpoint.
///
/// Returns [`Allocation::NoGap`] when the neighbors leave no integer in
/// between, when a prepend would collide with the floor of the key
/// space, or when an append would cross the configured ceiling.
pub fn insert_between(before: Option<i64>, after: Option<i64>, cfg: &OrderConfig) -> Allocation {
    match (before, after) {
        (None, None) => Allocation::Key(cfg.initial_key),
        (None, Some(after)) => {
            let candidate = (after - cfg.spacing).max(1);
            if candidate >= after {
                Allocation::NoGap
            } else {
                Allocation::Key(candidate)
            }
        }
        (Some(before), None) => {
            let candidate = before + cfg.spacing;
            if candidate > cfg.max_key {
                Allocation::NoGap
            } else {
                Allocation::Key(candidate)
            }
        }
        (Some(before), Some(after)) => {
            // after - before == 1 leaves no integer strictly in between;
            // after <= before means the snapshot is already inconsistent.
            // Both force a rebalance.
            if after - before < 2 {
                Allocation::NoGap
            } else {
                Allocation::Key(before + (after - before) / 2)
            }
        }
    }
}
