//! Rebalance detection over a scope's ordered key sequence.
//!
//! # Responsibility
//! - Decide whether a scope's spacing has degraded enough that further
//!   midpoint insertions are at risk.
//!
//! # Invariants
//! - Pure inspection: the caller supplies keys in visible order.
//! - A `true` result obliges the caller to rebalance inside the same
//!   transaction as the operation that asked.

use crate::order::{OrderConfig, UNINITIALIZED_ORDER};

/// Returns whether the scope behind `keys` needs rebalancing.
///
/// Triggers, any one sufficient:
/// 1. fewer than 2 items never need rebalancing;
/// 2. any key equals the uninitialized sentinel (legacy rows);
/// 3. any adjacent gap is below 2, leaving no room for a midpoint;
/// 4. the largest adjacent gap exceeds the smallest by more than the
///    configured irregularity threshold. This fires before a gap fully
///    collapses, amortizing rebalance cost across a scope that keeps
///    absorbing tight inserts at one end.
pub fn needs_rebalancing(keys: &[i64], cfg: &OrderConfig) -> bool {
    if keys.len() < 2 {
        return false;
    }

    if keys.contains(&UNINITIALIZED_ORDER) {
        return true;
    }

    let mut min_gap = i64::MAX;
    let mut max_gap = i64::MIN;
    for pair in keys.windows(2) {
        let gap = pair[1] - pair[0];
        if gap < 2 {
            return true;
        }
        min_gap = min_gap.min(gap);
        max_gap = max_gap.max(gap);
    }

    max_gap > min_gap.saturating_mul(cfg.irregularity_threshold)
}
