//! Reorder use-case service.
//!
//! # Responsibility
//! - Expose the three engine operations (`append_to_scope`, `insert_at`,
//!   `move_across_scope`) as tagged request variants.
//! - Resolve the task's current scope and version stamp before every
//!   repository call, retry a detected conflict once with fresh state,
//!   and surface the second conflict instead of retrying indefinitely.
//! - Fan out committed `OrderDelta` records to registered sinks so other
//!   open views of the same scope can reconcile.
//!
//! # Invariants
//! - `NoGap` never reaches this layer; the repository folds the
//!   rebalance-and-retry into the triggering transaction.
//! - Every committed operation emits at least one delta (the operated
//!   task), plus one per row a folded rebalance rewrote.

use crate::model::scope::{ScopeKey, TaskId};
use crate::model::task::{OrderDelta, Task};
use crate::repo::task_repo::{CommittedReorder, RepoError, TaskRepository};
use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Tagged reorder request, one variant per engine operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReorderRequest {
    /// Move `task` to the end of `scope` (its own or another).
    Append { task: TaskId, scope: ScopeKey },
    /// Reposition `task` between two siblings of its current scope.
    Insert {
        task: TaskId,
        scope: ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
    },
    /// Relocate `task` into `target` between the named siblings.
    Move {
        task: TaskId,
        target: ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
    },
}

impl ReorderRequest {
    fn op_name(&self) -> &'static str {
        match self {
            Self::Append { .. } => "append",
            Self::Insert { .. } => "insert",
            Self::Move { .. } => "move",
        }
    }
}

/// Errors surfaced to request handlers by the reorder service.
#[derive(Debug)]
pub enum ReorderError {
    /// The named scope does not contain the task, or is not a valid
    /// target for the request.
    ScopeNotFound { scope: String },
    /// The task (or a named neighbor) does not exist.
    TaskNotFound(TaskId),
    /// Concurrent modification detected twice in a row.
    StaleVersionConflict { task: TaskId },
    /// A folded rebalance failed; the whole operation rolled back.
    RebalanceFailed { scope: String },
    /// Persistence-layer failure.
    Persistence(RepoError),
}

impl Display for ReorderError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ScopeNotFound { scope } => write!(f, "scope not found: `{scope}`"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::StaleVersionConflict { task } => {
                write!(f, "task {task} was modified concurrently; reorder aborted")
            }
            Self::RebalanceFailed { scope } => {
                write!(f, "rebalance of scope `{scope}` failed; reorder aborted")
            }
            Self::Persistence(err) => write!(f, "{err}"),
        }
    }
}

impl Error for ReorderError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Persistence(err) => Some(err),
            _ => None,
        }
    }
}

/// Observer for committed order deltas.
pub trait OrderDeltaSink {
    /// Called once per committed delta, in commit order.
    fn on_delta(&self, delta: &OrderDelta);
}

/// Use-case service for the ordering engine.
pub struct ReorderService<R: TaskRepository> {
    repo: R,
    sinks: Vec<Box<dyn OrderDeltaSink>>,
}

impl<R: TaskRepository> ReorderService<R> {
    /// Creates a service using the provided repository implementation.
    pub fn new(repo: R) -> Self {
        Self {
            repo,
            sinks: Vec::new(),
        }
    }

    /// Registers an observer for committed order deltas.
    pub fn register_sink(&mut self, sink: Box<dyn OrderDeltaSink>) {
        self.sinks.push(sink);
    }

    /// Creates a task appended to the end of `scope`.
    pub fn create_task(
        &self,
        scope: &ScopeKey,
        title: impl AsRef<str>,
    ) -> Result<Task, ReorderError> {
        let task = self
            .repo
            .create_task(scope, title.as_ref())
            .map_err(map_repo_error)?;
        self.emit(&[OrderDelta {
            task_uuid: task.uuid,
            scope: task.scope,
            order_value: task.order_value,
        }]);
        Ok(task)
    }

    /// Loads one task by id.
    pub fn get_task(&self, id: TaskId) -> Result<Option<Task>, ReorderError> {
        self.repo.get_task(id).map_err(map_repo_error)
    }

    /// Lists a scope's tasks in visible order.
    pub fn list_scope(&self, scope: &ScopeKey) -> Result<Vec<Task>, ReorderError> {
        self.repo.list_scope(scope).map_err(map_repo_error)
    }

    /// Dispatches one tagged reorder request.
    pub fn submit(&self, request: &ReorderRequest) -> Result<CommittedReorder, ReorderError> {
        let started_at = Instant::now();
        let op = request.op_name();

        let result = match request {
            ReorderRequest::Append { task, scope } => self.append_to_scope(*task, scope),
            ReorderRequest::Insert {
                task,
                scope,
                before,
                after,
            } => self.insert_at(*task, scope, *before, *after),
            ReorderRequest::Move {
                task,
                target,
                before,
                after,
            } => self.move_across_scope(*task, target, *before, *after),
        };

        match &result {
            Ok(committed) => info!(
                "event=reorder_commit module=service status=ok op={op} order_value={} deltas={} duration_ms={}",
                committed.order_value,
                committed.deltas.len(),
                started_at.elapsed().as_millis(),
            ),
            Err(err) => warn!(
                "event=reorder_commit module=service status=error op={op} duration_ms={} error={err}",
                started_at.elapsed().as_millis(),
            ),
        }
        result
    }

    /// Moves `task` to the end of `scope`. When `scope` is the task's
    /// current scope this is a same-scope reorder; otherwise it is a
    /// cross-scope move with append placement.
    pub fn append_to_scope(
        &self,
        task: TaskId,
        scope: &ScopeKey,
    ) -> Result<CommittedReorder, ReorderError> {
        self.with_conflict_retry(task, |current| {
            if current.scope == *scope {
                self.repo
                    .insert_at(task, scope, None, None, current.version)
            } else {
                self.repo.move_across_scope(
                    task,
                    &current.scope,
                    scope,
                    None,
                    None,
                    current.version,
                )
            }
        })
    }

    /// Repositions `task` between `before` and `after` inside `scope`.
    pub fn insert_at(
        &self,
        task: TaskId,
        scope: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
    ) -> Result<CommittedReorder, ReorderError> {
        self.with_conflict_retry(task, |current| {
            self.repo.insert_at(task, scope, before, after, current.version)
        })
    }

    /// Relocates `task` into `target` between the named siblings.
    pub fn move_across_scope(
        &self,
        task: TaskId,
        target: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
    ) -> Result<CommittedReorder, ReorderError> {
        self.with_conflict_retry(task, |current| {
            self.repo.move_across_scope(
                task,
                &current.scope,
                target,
                before,
                after,
                current.version,
            )
        })
    }

    /// Runs `operation` against the task's freshly read state, retrying
    /// exactly once when a stale version or an order-value collision
    /// signals a concurrent writer. The second conflict surfaces to
    /// bound request latency.
    fn with_conflict_retry(
        &self,
        task: TaskId,
        operation: impl Fn(&Task) -> Result<CommittedReorder, RepoError>,
    ) -> Result<CommittedReorder, ReorderError> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let current = self
                .repo
                .get_task(task)
                .map_err(map_repo_error)?
                .ok_or(ReorderError::TaskNotFound(task))?;

            match operation(&current) {
                Ok(committed) => {
                    self.emit(&committed.deltas);
                    return Ok(committed);
                }
                Err(err) if is_conflict(&err) && attempts == 1 => {
                    warn!(
                        "event=reorder_retry module=service status=retry task={task} error={err}"
                    );
                    continue;
                }
                Err(err) if is_conflict(&err) => {
                    return Err(ReorderError::StaleVersionConflict { task });
                }
                Err(err) => return Err(map_repo_error(err)),
            }
        }
    }

    fn emit(&self, deltas: &[OrderDelta]) {
        for delta in deltas {
            for sink in &self.sinks {
                sink.on_delta(delta);
            }
        }
    }
}

fn is_conflict(err: &RepoError) -> bool {
    matches!(
        err,
        RepoError::VersionConflict { .. } | RepoError::DuplicateOrderValue { .. }
    )
}

fn map_repo_error(err: RepoError) -> ReorderError {
    match err {
        RepoError::TaskNotFound(id) => ReorderError::TaskNotFound(id),
        RepoError::NeighborNotFound { neighbor, .. } => ReorderError::TaskNotFound(neighbor),
        RepoError::TaskNotInScope { scope, .. } => ReorderError::ScopeNotFound { scope },
        RepoError::RebalanceFailed { scope, .. } => ReorderError::RebalanceFailed { scope },
        RepoError::VersionConflict { task, .. } => ReorderError::StaleVersionConflict { task },
        other => ReorderError::Persistence(other),
    }
}
