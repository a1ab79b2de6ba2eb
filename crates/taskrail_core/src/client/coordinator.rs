//! Optimistic drag-and-drop reorder coordinator.
//!
//! # Responsibility
//! - Track the client's visible order per scope and splice it
//!   optimistically the moment a drop lands, before any round-trip.
//! - Serialize commit requests per scope while letting distinct scopes
//!   commit independently.
//! - Reconcile authoritative keys on success; restore the pre-drag
//!   snapshot and surface a user-facing notice on failure.
//!
//! # Invariants
//! - Gesture phases only move forward: Dragging →
//!   OptimisticallyPlaced → {Committed | RolledBack}.
//! - An abandoned drag (cancel before drop) sends nothing.
//! - A cross-scope gesture occupies the queues of both its origin and
//!   target scopes until resolved, so no later gesture on either scope
//!   can commit underneath its snapshot.
//! - After a rollback the visible order equals the last known-good
//!   server order for every affected scope.

use crate::model::scope::{ScopeKey, TaskId};
use crate::repo::task_repo::CommittedReorder;
use crate::service::reorder_service::{ReorderError, ReorderRequest};
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Client-local identifier for one drag gesture.
pub type GestureId = u64;

const REORDER_FAILED_NOTICE: &str = "could not reorder, please retry";

/// Lifecycle of one drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragPhase {
    /// Gesture started; nothing spliced yet.
    Dragging,
    /// Dropped and spliced locally; commit not yet resolved.
    OptimisticallyPlaced,
    /// Server accepted; local state already matched.
    Committed,
    /// Server rejected or errored; snapshot restored.
    RolledBack,
}

/// Transport used to commit reorder requests against the server.
pub trait ReorderTransport {
    /// Submits one request; an error (including a client-side timeout
    /// mapped to an error by the caller) counts as a failed commit.
    fn submit(&mut self, request: &ReorderRequest) -> Result<CommittedReorder, ReorderError>;
}

/// Errors from coordinator state handling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorError {
    /// The task is not present in any loaded scope.
    UnknownTask(TaskId),
    /// The named scope has not been loaded into the coordinator.
    UnknownScope(String),
    /// The gesture id is not tracked.
    UnknownGesture(GestureId),
    /// The gesture is not in a phase that permits the call.
    InvalidPhase {
        gesture: GestureId,
        phase: DragPhase,
    },
}

impl Display for CoordinatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownTask(id) => write!(f, "task {id} is not in any loaded scope"),
            Self::UnknownScope(scope) => write!(f, "scope `{scope}` is not loaded"),
            Self::UnknownGesture(id) => write!(f, "unknown gesture {id}"),
            Self::InvalidPhase { gesture, phase } => {
                write!(f, "gesture {gesture} is in phase {phase:?}")
            }
        }
    }
}

impl Error for CoordinatorError {}

/// Resolution of one pumped commit.
#[derive(Debug)]
pub enum CommitResolution {
    /// The server accepted; the authoritative key is recorded.
    Committed {
        gesture: GestureId,
        order_value: i64,
    },
    /// The gesture was rolled back. `error` is `None` for gestures
    /// cancelled in cascade behind a failed commit on the same scope.
    RolledBack {
        gesture: GestureId,
        error: Option<ReorderError>,
    },
}

#[derive(Debug)]
struct Gesture {
    task: TaskId,
    origin_scope: ScopeKey,
    /// The scope whose queue submits this gesture; set on drop.
    commit_scope: Option<ScopeKey>,
    phase: DragPhase,
    /// Pre-splice copies of every scope the drop touched.
    snapshot: Vec<(ScopeKey, Vec<TaskId>)>,
}

/// Client-side reorder coordinator over one transport.
pub struct ReorderCoordinator<T: ReorderTransport> {
    transport: T,
    scopes: HashMap<ScopeKey, Vec<TaskId>>,
    known_keys: HashMap<TaskId, i64>,
    gestures: HashMap<GestureId, Gesture>,
    queues: HashMap<ScopeKey, VecDeque<GestureId>>,
    next_gesture: GestureId,
    notice: Option<String>,
}

impl<T: ReorderTransport> ReorderCoordinator<T> {
    /// Creates a coordinator with no loaded scopes.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            scopes: HashMap::new(),
            known_keys: HashMap::new(),
            gestures: HashMap::new(),
            queues: HashMap::new(),
            next_gesture: 1,
            notice: None,
        }
    }

    /// Seeds (or replaces) one scope's visible order from a server read.
    pub fn load_scope(&mut self, scope: ScopeKey, items: Vec<TaskId>) {
        self.scopes.insert(scope, items);
    }

    /// The current local visible order of one scope.
    pub fn visible_order(&self, scope: &ScopeKey) -> Option<&[TaskId]> {
        self.scopes.get(scope).map(Vec::as_slice)
    }

    /// The last committed order key observed for `task`, if any.
    pub fn known_order_value(&self, task: TaskId) -> Option<i64> {
        self.known_keys.get(&task).copied()
    }

    /// Current phase of a gesture.
    pub fn phase(&self, gesture: GestureId) -> Option<DragPhase> {
        self.gestures.get(&gesture).map(|g| g.phase)
    }

    /// Takes the pending user-facing notice, if a rollback produced one.
    pub fn take_notice(&mut self) -> Option<String> {
        self.notice.take()
    }

    /// Starts a drag gesture for `task`.
    ///
    /// A task whose previous gesture has not resolved yet cannot be
    /// dragged again; the stale gesture would otherwise rebuild its
    /// request from the newer placement and submit it twice.
    pub fn begin_drag(&mut self, task: TaskId) -> Result<GestureId, CoordinatorError> {
        if let Some((id, state)) = self.gestures.iter().find(|(_, state)| {
            state.task == task
                && matches!(
                    state.phase,
                    DragPhase::Dragging | DragPhase::OptimisticallyPlaced
                )
        }) {
            return Err(CoordinatorError::InvalidPhase {
                gesture: *id,
                phase: state.phase,
            });
        }

        let origin_scope = self
            .scopes
            .iter()
            .find(|(_, items)| items.contains(&task))
            .map(|(scope, _)| *scope)
            .ok_or(CoordinatorError::UnknownTask(task))?;

        let gesture = self.next_gesture;
        self.next_gesture += 1;
        self.gestures.insert(
            gesture,
            Gesture {
                task,
                origin_scope,
                commit_scope: None,
                phase: DragPhase::Dragging,
                snapshot: Vec::new(),
            },
        );
        Ok(gesture)
    }

    /// Abandons a drag before it was dropped. Nothing was spliced and
    /// nothing is sent.
    pub fn cancel_drag(&mut self, gesture: GestureId) -> Result<(), CoordinatorError> {
        let state = self
            .gestures
            .get(&gesture)
            .ok_or(CoordinatorError::UnknownGesture(gesture))?;
        if state.phase != DragPhase::Dragging {
            return Err(CoordinatorError::InvalidPhase {
                gesture,
                phase: state.phase,
            });
        }
        self.gestures.remove(&gesture);
        Ok(())
    }

    /// Drops the dragged task at `index` of `target_scope`, splicing the
    /// local order immediately and queueing the commit for [`Self::pump`].
    pub fn drop_at(
        &mut self,
        gesture: GestureId,
        target_scope: ScopeKey,
        index: usize,
    ) -> Result<(), CoordinatorError> {
        let state = self
            .gestures
            .get(&gesture)
            .ok_or(CoordinatorError::UnknownGesture(gesture))?;
        if state.phase != DragPhase::Dragging {
            return Err(CoordinatorError::InvalidPhase {
                gesture,
                phase: state.phase,
            });
        }
        let task = state.task;
        let origin_scope = state.origin_scope;

        if !self.scopes.contains_key(&target_scope) {
            return Err(CoordinatorError::UnknownScope(target_scope.encode()));
        }

        let mut snapshot = vec![(
            origin_scope,
            self.scopes.get(&origin_scope).cloned().unwrap_or_default(),
        )];
        if target_scope != origin_scope {
            snapshot.push((
                target_scope,
                self.scopes.get(&target_scope).cloned().unwrap_or_default(),
            ));
        }

        if let Some(items) = self.scopes.get_mut(&origin_scope) {
            items.retain(|id| *id != task);
        }
        let Some(target_items) = self.scopes.get_mut(&target_scope) else {
            return Err(CoordinatorError::UnknownScope(target_scope.encode()));
        };
        let index = index.min(target_items.len());
        target_items.insert(index, task);

        let Some(state) = self.gestures.get_mut(&gesture) else {
            return Err(CoordinatorError::UnknownGesture(gesture));
        };
        state.snapshot = snapshot;
        state.commit_scope = Some(target_scope);
        state.phase = DragPhase::OptimisticallyPlaced;

        self.queues.entry(target_scope).or_default().push_back(gesture);
        if target_scope != origin_scope {
            // A cross-scope move is in flight for both scopes; the origin
            // queue holds it too so later origin-scope gestures wait for
            // the move to resolve.
            self.queues.entry(origin_scope).or_default().push_back(gesture);
        }
        Ok(())
    }

    /// Sends at most one queued commit per scope through the transport
    /// and resolves each as committed or rolled back.
    ///
    /// Serializing per scope keeps a single client from racing itself
    /// into self-contradicting optimistic states; calling `pump`
    /// repeatedly drains deeper queues one commit at a time.
    pub fn pump(&mut self) -> Vec<CommitResolution> {
        let ready: Vec<ScopeKey> = self
            .queues
            .iter()
            .filter(|(_, queue)| !queue.is_empty())
            .map(|(scope, _)| *scope)
            .collect();

        let mut resolutions = Vec::new();
        for scope in ready {
            let Some(head) = self.queues.get(&scope).and_then(|queue| queue.front().copied())
            else {
                continue;
            };
            // A cross-scope gesture heads both its origin and target
            // queues but submits from the target; the other queue waits
            // for it to resolve.
            let submits_here = self
                .gestures
                .get(&head)
                .map(|state| state.commit_scope == Some(scope))
                .unwrap_or(false);
            if !submits_here {
                continue;
            }
            if let Some(queue) = self.queues.get_mut(&scope) {
                queue.pop_front();
            }
            resolutions.extend(self.commit_one(head));
        }
        resolutions
    }

    fn commit_one(&mut self, gesture: GestureId) -> Vec<CommitResolution> {
        let Some(request) = self.build_request(gesture) else {
            // The task left the local view (a reload replaced its scope)
            // before the commit was sent; resolve as a clean rollback.
            self.remove_from_queues(gesture);
            self.restore_snapshot(gesture);
            return vec![CommitResolution::RolledBack {
                gesture,
                error: None,
            }];
        };

        match self.transport.submit(&request) {
            Ok(committed) => {
                for delta in &committed.deltas {
                    self.known_keys.insert(delta.task_uuid, delta.order_value);
                }
                if let Some(state) = self.gestures.get_mut(&gesture) {
                    state.phase = DragPhase::Committed;
                }
                self.remove_from_queues(gesture);
                vec![CommitResolution::Committed {
                    gesture,
                    order_value: committed.order_value,
                }]
            }
            Err(error) => self.roll_back_failed(gesture, error),
        }
    }

    /// Rolls back the failed gesture and cascades over every commit
    /// still queued on a scope its snapshot touched. Snapshots are
    /// restored newest-first so the final state is the pre-failure order
    /// for all affected scopes.
    fn roll_back_failed(&mut self, failed: GestureId, error: ReorderError) -> Vec<CommitResolution> {
        let affected: Vec<ScopeKey> = self
            .gestures
            .get(&failed)
            .map(|state| state.snapshot.iter().map(|(scope, _)| *scope).collect())
            .unwrap_or_default();

        let mut cancelled: Vec<GestureId> = Vec::new();
        for scope in &affected {
            if let Some(queue) = self.queues.get_mut(scope) {
                for gesture in queue.drain(..) {
                    if gesture != failed && !cancelled.contains(&gesture) {
                        cancelled.push(gesture);
                    }
                }
            }
        }
        cancelled.reverse();
        cancelled.push(failed);

        let mut resolutions = Vec::new();
        for gesture in cancelled {
            self.remove_from_queues(gesture);
            self.restore_snapshot(gesture);
            resolutions.push(CommitResolution::RolledBack {
                gesture,
                error: None,
            });
        }

        // Attach the transport error to the gesture that actually failed.
        if let Some(CommitResolution::RolledBack { error: slot, .. }) = resolutions.last_mut() {
            *slot = Some(error);
        }
        self.notice = Some(REORDER_FAILED_NOTICE.to_string());
        resolutions
    }

    /// Restores the gesture's pre-drag snapshots newest-first and marks
    /// it rolled back.
    fn restore_snapshot(&mut self, gesture: GestureId) {
        if let Some(state) = self.gestures.get_mut(&gesture) {
            for (scope, items) in state.snapshot.drain(..).rev() {
                self.scopes.insert(scope, items);
            }
            state.phase = DragPhase::RolledBack;
        }
    }

    fn remove_from_queues(&mut self, gesture: GestureId) {
        for queue in self.queues.values_mut() {
            queue.retain(|queued| *queued != gesture);
        }
    }

    /// Builds the server request from the task's current local
    /// neighbors: the items directly above and below it in the spliced
    /// order. The server still resolves keys authoritatively.
    fn build_request(&self, gesture: GestureId) -> Option<ReorderRequest> {
        let state = self.gestures.get(&gesture)?;
        let (target_scope, items) = self
            .scopes
            .iter()
            .find(|(_, items)| items.contains(&state.task))?;
        let position = items.iter().position(|id| *id == state.task)?;

        let before = position.checked_sub(1).map(|i| items[i]);
        let after = items.get(position + 1).copied();

        let request = match after {
            None => ReorderRequest::Append {
                task: state.task,
                scope: *target_scope,
            },
            Some(after) if *target_scope == state.origin_scope => ReorderRequest::Insert {
                task: state.task,
                scope: *target_scope,
                before,
                after: Some(after),
            },
            Some(after) => ReorderRequest::Move {
                task: state.task,
                target: *target_scope,
                before,
                after: Some(after),
            },
        };
        Some(request)
    }
}
