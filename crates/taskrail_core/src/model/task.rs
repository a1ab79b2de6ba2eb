//! Ordered task domain record.
//!
//! # Responsibility
//! - Define the canonical task shape consumed by the ordering engine.
//! - Carry the optimistic `version` stamp used for conflict detection.
//!
//! # Invariants
//! - `order_value` is strictly positive once assigned; `0` is the
//!   reserved uninitialized sentinel for legacy/partially-migrated rows.
//! - `version` increases by exactly one on every committed write.

use crate::model::scope::{ScopeKey, TaskId};
use serde::{Deserialize, Serialize};

/// Canonical record for one ordered task.
///
/// Only fields relevant to ordinal positioning live here; the
/// surrounding CRUD attributes (assignees, descriptions, attendance)
/// belong to external collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    /// Stable global ID.
    pub uuid: TaskId,
    /// The scope this task is ordered in.
    pub scope: ScopeKey,
    /// User-facing label.
    pub title: String,
    /// Bounded integer order key within `scope`.
    pub order_value: i64,
    /// Optimistic concurrency stamp, bumped on every write.
    pub version: i64,
    /// Epoch ms creation timestamp; tiebreaker only, never load-bearing.
    pub created_at: i64,
    /// Epoch ms update timestamp.
    pub updated_at: i64,
}

/// One committed order change, emitted after every successful operation
/// so other open views of the same scope can reconcile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDelta {
    /// Task whose order key changed.
    pub task_uuid: TaskId,
    /// Scope the task now belongs to.
    pub scope: ScopeKey,
    /// Committed order key.
    pub order_value: i64,
}
