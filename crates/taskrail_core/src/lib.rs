//! Ordinal positioning engine for ordered tasks.
//!
//! Maintains a stable, densely orderable sequence of tasks inside a
//! scope (a project root, a parent task's children, or a status column)
//! so that a drag to an arbitrary position never rewrites every
//! sibling. Integer order keys are allocated with spacing, degraded
//! scopes are rebalanced inside the triggering transaction, and an
//! optimistic client coordinator keeps local state consistent with the
//! server's authoritative keys.

pub mod client;
pub mod db;
pub mod logging;
pub mod model;
pub mod order;
pub mod repo;
pub mod service;

pub use client::coordinator::{
    CommitResolution, CoordinatorError, DragPhase, GestureId, ReorderCoordinator, ReorderTransport,
};
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::scope::{ColumnId, Lane, ProjectId, ScopeKey, TaskId};
pub use model::task::{OrderDelta, Task};
pub use order::allocator::Allocation;
pub use order::OrderConfig;
pub use repo::task_repo::{
    CommittedReorder, RepoError, RepoResult, SqliteTaskRepository, TaskRepository,
};
pub use service::reorder_service::{
    OrderDeltaSink, ReorderError, ReorderRequest, ReorderService,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
