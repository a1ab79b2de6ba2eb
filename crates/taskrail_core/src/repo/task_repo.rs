//! Task ordering repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide the persistence primitives consumed by the ordering engine
//!   (sibling listing, versioned order writes, atomic batch rewrites).
//! - Execute the transactional insert/move/rebalance operations with
//!   neighbor keys resolved from persisted state, never trusted from
//!   the client.
//!
//! # Invariants
//! - Within a scope, `order_value` is strictly increasing in visible
//!   order and contains no duplicates (enforced by the unique
//!   `(scope_key, order_value)` index).
//! - A cross-scope move updates `scope_key` and `order_value` in one
//!   statement inside one transaction; an external reader observes the
//!   task in exactly one scope at every instant.
//! - Rebalancing changes absolute keys only, never relative order, and
//!   rolls back entirely with the triggering operation on failure.

use crate::db::migrations::latest_version;
use crate::db::DbError;
use crate::model::scope::{ScopeKey, TaskId};
use crate::model::task::{OrderDelta, Task};
use crate::order::allocator::{insert_between, next_append_key, Allocation};
use crate::order::detector::needs_rebalancing;
use crate::order::OrderConfig;
use rusqlite::{params, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const TASK_SELECT_SQL: &str = "SELECT
    uuid,
    project_uuid,
    scope_key,
    title,
    order_value,
    version,
    created_at,
    updated_at
FROM tasks";

/// Result type used by task repository operations.
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors from task repository operations.
#[derive(Debug)]
pub enum RepoError {
    /// Underlying SQLite/bootstrap error.
    Db(DbError),
    /// Target task does not exist.
    TaskNotFound(TaskId),
    /// Task exists but is not ordered in the scope named by the caller.
    TaskNotInScope { task: TaskId, scope: String },
    /// A caller-named neighbor is not a sibling in the scope.
    NeighborNotFound { neighbor: TaskId, scope: String },
    /// The optimistic version stamp no longer matches the row.
    VersionConflict {
        task: TaskId,
        expected: i64,
        actual: i64,
    },
    /// A concurrent writer claimed the same `(scope_key, order_value)`.
    DuplicateOrderValue { scope: String, order_value: i64 },
    /// A scope rebalance could not be applied; the enclosing operation
    /// rolled back with it.
    RebalanceFailed {
        scope: String,
        source: Box<RepoError>,
    },
    /// Connection schema is not at the expected migrated version.
    UninitializedConnection {
        expected_version: u32,
        actual_version: u32,
    },
    /// Required table is missing.
    MissingRequiredTable(&'static str),
    /// Required column is missing from expected table.
    MissingRequiredColumn {
        table: &'static str,
        column: &'static str,
    },
    /// Persisted data cannot be converted to a valid read model.
    InvalidData(String),
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::TaskNotFound(id) => write!(f, "task not found: {id}"),
            Self::TaskNotInScope { task, scope } => {
                write!(f, "task {task} is not ordered in scope `{scope}`")
            }
            Self::NeighborNotFound { neighbor, scope } => {
                write!(f, "neighbor {neighbor} is not a sibling in scope `{scope}`")
            }
            Self::VersionConflict {
                task,
                expected,
                actual,
            } => write!(
                f,
                "task {task} was modified concurrently: expected version {expected}, found {actual}"
            ),
            Self::DuplicateOrderValue { scope, order_value } => write!(
                f,
                "order value {order_value} already taken in scope `{scope}`"
            ),
            Self::RebalanceFailed { scope, source } => {
                write!(f, "rebalance of scope `{scope}` failed: {source}")
            }
            Self::UninitializedConnection {
                expected_version,
                actual_version,
            } => write!(
                f,
                "task repository requires schema version {expected_version}, got {actual_version}"
            ),
            Self::MissingRequiredTable(table) => {
                write!(f, "task repository requires table `{table}`")
            }
            Self::MissingRequiredColumn { table, column } => write!(
                f,
                "task repository requires column `{column}` in table `{table}`"
            ),
            Self::InvalidData(message) => write!(f, "invalid task data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::RebalanceFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Outcome of one committed insert/move, including every row a folded
/// rebalance rewrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedReorder {
    /// The authoritative order key of the operated task.
    pub order_value: i64,
    /// The task's version stamp after the commit.
    pub version: i64,
    /// All committed order changes, one per rewritten row, latest wins.
    pub deltas: Vec<OrderDelta>,
}

/// Repository interface for ordered task persistence.
pub trait TaskRepository {
    /// Creates one task appended to the end of `scope`.
    fn create_task(&self, scope: &ScopeKey, title: &str) -> RepoResult<Task>;
    /// Loads one task by id.
    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>>;
    /// Lists a scope's tasks in visible order.
    fn list_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<Task>>;
    /// Lists `(task, order_value)` pairs of a scope in visible order.
    fn find_sibling_keys(&self, scope: &ScopeKey) -> RepoResult<Vec<(TaskId, i64)>>;
    /// Writes one order value guarded by the optimistic version stamp.
    /// Returns the new version stamp.
    fn update_order_value(
        &self,
        id: TaskId,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64>;
    /// Atomically rewrites order values for tasks in one scope.
    fn batch_update_order_values(
        &self,
        scope: &ScopeKey,
        assignments: &[(TaskId, i64)],
    ) -> RepoResult<()>;
    /// Moves one task to a new scope and order value in one statement,
    /// guarded by the optimistic version stamp. Returns the new version.
    fn update_task_scope_and_order(
        &self,
        id: TaskId,
        new_scope: &ScopeKey,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64>;
    /// Rewrites a whole scope to evenly spaced keys, preserving order.
    fn rebalance_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<OrderDelta>>;
    /// Repositions one task between two siblings of its own scope.
    fn insert_at(
        &self,
        id: TaskId,
        scope: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
        expected_version: i64,
    ) -> RepoResult<CommittedReorder>;
    /// Relocates one task from `source` into `target` between the named
    /// siblings of `target`.
    #[allow(clippy::too_many_arguments)]
    fn move_across_scope(
        &self,
        id: TaskId,
        source: &ScopeKey,
        target: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
        expected_version: i64,
    ) -> RepoResult<CommittedReorder>;
}

/// SQLite-backed task repository.
pub struct SqliteTaskRepository<'conn> {
    conn: &'conn Connection,
    cfg: OrderConfig,
}

impl<'conn> SqliteTaskRepository<'conn> {
    /// Creates a repository with default ordering tunables from a
    /// migrated connection.
    pub fn try_new(conn: &'conn Connection) -> RepoResult<Self> {
        Self::with_config(conn, OrderConfig::default())
    }

    /// Creates a repository with caller-supplied ordering tunables.
    pub fn with_config(conn: &'conn Connection, cfg: OrderConfig) -> RepoResult<Self> {
        ensure_task_connection_ready(conn)?;
        Ok(Self { conn, cfg })
    }

    /// Active ordering tunables.
    pub fn config(&self) -> &OrderConfig {
        &self.cfg
    }
}

impl TaskRepository for SqliteTaskRepository<'_> {
    fn create_task(&self, scope: &ScopeKey, title: &str) -> RepoResult<Task> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;

        let mut candidate = next_append_key(max_order_value(&tx, scope)?, &self.cfg);
        if candidate > self.cfg.max_key {
            rebalance_scope_tx(&tx, scope, &self.cfg)?;
            candidate = next_append_key(max_order_value(&tx, scope)?, &self.cfg);
        }

        let uuid = Uuid::new_v4();
        tx.execute(
            "INSERT INTO tasks (uuid, project_uuid, scope_key, title, order_value)
             VALUES (?1, ?2, ?3, ?4, ?5);",
            params![
                uuid.to_string(),
                scope.project.to_string(),
                scope.encode(),
                title,
                candidate,
            ],
        )
        .map_err(|err| map_order_write_error(err, scope, candidate))?;

        let task = load_required_task(&tx, uuid)?;
        tx.commit()?;
        Ok(task)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        load_task(self.conn, id)
    }

    fn list_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<Task>> {
        let mut stmt = self.conn.prepare(&format!(
            "{TASK_SELECT_SQL}
             WHERE scope_key = ?1
             ORDER BY order_value ASC, created_at ASC, uuid ASC;"
        ))?;
        let mut rows = stmt.query([scope.encode()])?;

        let mut tasks = Vec::new();
        while let Some(row) = rows.next()? {
            tasks.push(parse_task_row(row)?);
        }
        Ok(tasks)
    }

    fn find_sibling_keys(&self, scope: &ScopeKey) -> RepoResult<Vec<(TaskId, i64)>> {
        sibling_keys(self.conn, scope)
    }

    fn update_order_value(
        &self,
        id: TaskId,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64> {
        let task = load_task(self.conn, id)?.ok_or(RepoError::TaskNotFound(id))?;
        if task.version != expected_version {
            return Err(RepoError::VersionConflict {
                task: id,
                expected: expected_version,
                actual: task.version,
            });
        }

        let changed = self
            .conn
            .execute(
                "UPDATE tasks
                 SET order_value = ?2,
                     version = version + 1,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?1
                   AND version = ?3;",
                params![id.to_string(), new_order, expected_version],
            )
            .map_err(|err| map_order_write_error(err, &task.scope, new_order))?;

        if changed == 0 {
            let actual = load_task(self.conn, id)?
                .map(|task| task.version)
                .unwrap_or(0);
            return Err(RepoError::VersionConflict {
                task: id,
                expected: expected_version,
                actual,
            });
        }
        Ok(expected_version + 1)
    }

    fn batch_update_order_values(
        &self,
        scope: &ScopeKey,
        assignments: &[(TaskId, i64)],
    ) -> RepoResult<()> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        apply_order_assignments(&tx, scope, assignments)?;
        tx.commit()?;
        Ok(())
    }

    fn update_task_scope_and_order(
        &self,
        id: TaskId,
        new_scope: &ScopeKey,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64> {
        let task = load_task(self.conn, id)?.ok_or(RepoError::TaskNotFound(id))?;
        if task.version != expected_version {
            return Err(RepoError::VersionConflict {
                task: id,
                expected: expected_version,
                actual: task.version,
            });
        }

        let changed = self
            .conn
            .execute(
                "UPDATE tasks
                 SET scope_key = ?2,
                     project_uuid = ?3,
                     order_value = ?4,
                     version = version + 1,
                     updated_at = (strftime('%s', 'now') * 1000)
                 WHERE uuid = ?1
                   AND version = ?5;",
                params![
                    id.to_string(),
                    new_scope.encode(),
                    new_scope.project.to_string(),
                    new_order,
                    expected_version,
                ],
            )
            .map_err(|err| map_order_write_error(err, new_scope, new_order))?;

        if changed == 0 {
            let actual = load_task(self.conn, id)?
                .map(|task| task.version)
                .unwrap_or(0);
            return Err(RepoError::VersionConflict {
                task: id,
                expected: expected_version,
                actual,
            });
        }
        Ok(expected_version + 1)
    }

    fn rebalance_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<OrderDelta>> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let deltas = rebalance_scope_tx(&tx, scope, &self.cfg)?;
        tx.commit()?;
        Ok(deltas)
    }

    fn insert_at(
        &self,
        id: TaskId,
        scope: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
        expected_version: i64,
    ) -> RepoResult<CommittedReorder> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = insert_at_tx(&tx, id, scope, before, after, expected_version, &self.cfg)?;
        tx.commit()?;
        Ok(outcome)
    }

    fn move_across_scope(
        &self,
        id: TaskId,
        source: &ScopeKey,
        target: &ScopeKey,
        before: Option<TaskId>,
        after: Option<TaskId>,
        expected_version: i64,
    ) -> RepoResult<CommittedReorder> {
        if source == target {
            return self.insert_at(id, target, before, after, expected_version);
        }

        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let outcome = move_across_scope_tx(
            &tx,
            id,
            source,
            target,
            before,
            after,
            expected_version,
            &self.cfg,
        )?;
        tx.commit()?;
        Ok(outcome)
    }
}

fn insert_at_tx(
    conn: &Connection,
    id: TaskId,
    scope: &ScopeKey,
    before: Option<TaskId>,
    after: Option<TaskId>,
    expected_version: i64,
    cfg: &OrderConfig,
) -> RepoResult<CommittedReorder> {
    let task = load_task(conn, id)?.ok_or(RepoError::TaskNotFound(id))?;
    if task.scope != *scope {
        return Err(RepoError::TaskNotInScope {
            task: id,
            scope: scope.encode(),
        });
    }
    if task.version != expected_version {
        return Err(RepoError::VersionConflict {
            task: id,
            expected: expected_version,
            actual: task.version,
        });
    }

    let mut deltas = Vec::new();
    let mut neighbors = resolve_neighbors(conn, scope, Some(id), before, after)?;
    let mut allocation = insert_between(neighbors.0, neighbors.1, cfg);

    if allocation == Allocation::NoGap {
        deltas.extend(rebalance_scope_tx(conn, scope, cfg)?);
        neighbors = resolve_neighbors(conn, scope, Some(id), before, after)?;
        allocation = insert_between(neighbors.0, neighbors.1, cfg);
    }

    let key = committed_key(allocation, scope)?;
    write_order_value(conn, id, scope, key)?;
    deltas.push(OrderDelta {
        task_uuid: id,
        scope: *scope,
        order_value: key,
    });

    deltas.extend(settle_scope(conn, scope, cfg)?);
    finish_reorder(conn, id, deltas)
}

#[allow(clippy::too_many_arguments)]
fn move_across_scope_tx(
    conn: &Connection,
    id: TaskId,
    source: &ScopeKey,
    target: &ScopeKey,
    before: Option<TaskId>,
    after: Option<TaskId>,
    expected_version: i64,
    cfg: &OrderConfig,
) -> RepoResult<CommittedReorder> {
    let task = load_task(conn, id)?.ok_or(RepoError::TaskNotFound(id))?;
    if task.scope != *source {
        return Err(RepoError::TaskNotInScope {
            task: id,
            scope: source.encode(),
        });
    }
    if task.version != expected_version {
        return Err(RepoError::VersionConflict {
            task: id,
            expected: expected_version,
            actual: task.version,
        });
    }

    let mut deltas = Vec::new();
    let mut neighbors = resolve_neighbors(conn, target, None, before, after)?;
    let mut allocation = insert_between(neighbors.0, neighbors.1, cfg);

    if allocation == Allocation::NoGap {
        deltas.extend(rebalance_scope_tx(conn, target, cfg)?);
        neighbors = resolve_neighbors(conn, target, None, before, after)?;
        allocation = insert_between(neighbors.0, neighbors.1, cfg);
    }

    let key = committed_key(allocation, target)?;
    // scope_key and order_value move together; the source scope keeps
    // its remaining keys untouched.
    conn.execute(
        "UPDATE tasks
         SET scope_key = ?2,
             project_uuid = ?3,
             order_value = ?4,
             version = version + 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1;",
        params![
            id.to_string(),
            target.encode(),
            target.project.to_string(),
            key,
        ],
    )
    .map_err(|err| map_order_write_error(err, target, key))?;
    deltas.push(OrderDelta {
        task_uuid: id,
        scope: *target,
        order_value: key,
    });

    deltas.extend(settle_scope(conn, target, cfg)?);
    finish_reorder(conn, id, deltas)
}

/// Runs the post-write detector pass, folding a rebalance into the open
/// transaction when spacing has degraded.
fn settle_scope(
    conn: &Connection,
    scope: &ScopeKey,
    cfg: &OrderConfig,
) -> RepoResult<Vec<OrderDelta>> {
    let keys = scope_order_values(conn, scope)?;
    if needs_rebalancing(&keys, cfg) {
        return rebalance_scope_tx(conn, scope, cfg);
    }
    Ok(Vec::new())
}

fn finish_reorder(
    conn: &Connection,
    id: TaskId,
    deltas: Vec<OrderDelta>,
) -> RepoResult<CommittedReorder> {
    let fresh = load_task(conn, id)?.ok_or_else(|| {
        RepoError::InvalidData(format!("task {id} disappeared inside its own reorder"))
    })?;
    Ok(CommittedReorder {
        order_value: fresh.order_value,
        version: fresh.version,
        deltas: dedupe_deltas(deltas),
    })
}

fn committed_key(allocation: Allocation, scope: &ScopeKey) -> RepoResult<i64> {
    match allocation {
        Allocation::Key(key) => Ok(key),
        // One rebalance restores full spacing, so a second NoGap means
        // the neighbor pair itself is inconsistent.
        Allocation::NoGap => Err(RepoError::InvalidData(format!(
            "no usable gap in scope `{}` directly after rebalancing",
            scope.encode()
        ))),
    }
}

fn write_order_value(
    conn: &Connection,
    id: TaskId,
    scope: &ScopeKey,
    order_value: i64,
) -> RepoResult<()> {
    conn.execute(
        "UPDATE tasks
         SET order_value = ?2,
             version = version + 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1;",
        params![id.to_string(), order_value],
    )
    .map_err(|err| map_order_write_error(err, scope, order_value))?;
    Ok(())
}

/// Resolves the bounding neighbor keys for an insertion, authoritatively
/// from persisted state.
///
/// A one-sided request derives the missing bound from the persisted
/// order: the next key above `before`, or the highest key below `after`.
/// With neither bound named, the insertion appends after the current
/// last sibling. The moving task itself (`exclude`) never bounds its own
/// insertion.
fn resolve_neighbors(
    conn: &Connection,
    scope: &ScopeKey,
    exclude: Option<TaskId>,
    before: Option<TaskId>,
    after: Option<TaskId>,
) -> RepoResult<(Option<i64>, Option<i64>)> {
    let siblings: Vec<(TaskId, i64)> = sibling_keys(conn, scope)?
        .into_iter()
        .filter(|(id, _)| Some(*id) != exclude)
        .collect();

    let lookup = |neighbor: TaskId| -> RepoResult<i64> {
        siblings
            .iter()
            .find(|(id, _)| *id == neighbor)
            .map(|(_, key)| *key)
            .ok_or(RepoError::NeighborNotFound {
                neighbor,
                scope: scope.encode(),
            })
    };

    let before_key = match before {
        Some(neighbor) => Some(lookup(neighbor)?),
        None => None,
    };
    let after_key = match after {
        Some(neighbor) => Some(lookup(neighbor)?),
        None => None,
    };

    let resolved = match (before_key, after_key) {
        (Some(b), None) if after.is_none() => {
            let next = siblings.iter().map(|(_, k)| *k).find(|k| *k > b);
            (Some(b), next)
        }
        (None, Some(a)) if before.is_none() => {
            let prev = siblings.iter().map(|(_, k)| *k).rev().find(|k| *k < a);
            (prev, Some(a))
        }
        (None, None) => (siblings.last().map(|(_, k)| *k), None),
        other => other,
    };
    Ok(resolved)
}

/// Rewrites every task of `scope` to `initial_key + index * spacing` in
/// one atomic batch, ordered by current key with `created_at` breaking
/// ties. Must run inside the caller's open transaction.
fn rebalance_scope_tx(
    conn: &Connection,
    scope: &ScopeKey,
    cfg: &OrderConfig,
) -> RepoResult<Vec<OrderDelta>> {
    let result = (|| -> RepoResult<Vec<OrderDelta>> {
        let ids = rebalance_order(conn, scope)?;
        let assignments: Vec<(TaskId, i64)> = ids
            .into_iter()
            .enumerate()
            .map(|(index, id)| (id, cfg.initial_key + index as i64 * cfg.spacing))
            .collect();

        apply_order_assignments(conn, scope, &assignments)?;

        Ok(assignments
            .into_iter()
            .map(|(task_uuid, order_value)| OrderDelta {
                task_uuid,
                scope: *scope,
                order_value,
            })
            .collect())
    })();

    result.map_err(|err| RepoError::RebalanceFailed {
        scope: scope.encode(),
        source: Box::new(err),
    })
}

/// Applies one order assignment batch in two phases. Phase one parks
/// every touched row on a negative temporary key so phase two's final
/// values cannot transiently collide with a not-yet-moved sibling under
/// the unique `(scope_key, order_value)` index.
fn apply_order_assignments(
    conn: &Connection,
    scope: &ScopeKey,
    assignments: &[(TaskId, i64)],
) -> RepoResult<()> {
    let encoded = scope.encode();

    let mut park = conn.prepare(
        "UPDATE tasks
         SET order_value = ?3
         WHERE uuid = ?1
           AND scope_key = ?2;",
    )?;
    for (index, (id, _)) in assignments.iter().enumerate() {
        let parked = -(index as i64) - 1;
        let changed = park.execute(params![id.to_string(), encoded, parked])?;
        if changed == 0 {
            return Err(RepoError::TaskNotInScope {
                task: *id,
                scope: encoded,
            });
        }
    }

    let mut settle = conn.prepare(
        "UPDATE tasks
         SET order_value = ?3,
             version = version + 1,
             updated_at = (strftime('%s', 'now') * 1000)
         WHERE uuid = ?1
           AND scope_key = ?2;",
    )?;
    for (id, order_value) in assignments {
        settle
            .execute(params![id.to_string(), encoded, order_value])
            .map_err(|err| map_order_write_error(err, scope, *order_value))?;
    }

    Ok(())
}

/// Keeps the last committed delta per task when an operation rewrote a
/// row more than once (pre-insert rebalance followed by the insert).
fn dedupe_deltas(deltas: Vec<OrderDelta>) -> Vec<OrderDelta> {
    let mut result: Vec<OrderDelta> = Vec::with_capacity(deltas.len());
    for delta in deltas {
        result.retain(|existing| existing.task_uuid != delta.task_uuid);
        result.push(delta);
    }
    result
}

fn sibling_keys(conn: &Connection, scope: &ScopeKey) -> RepoResult<Vec<(TaskId, i64)>> {
    let mut stmt = conn.prepare(
        "SELECT uuid, order_value
         FROM tasks
         WHERE scope_key = ?1
         ORDER BY order_value ASC, created_at ASC, uuid ASC;",
    )?;
    let mut rows = stmt.query([scope.encode()])?;

    let mut pairs = Vec::new();
    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get(0)?;
        pairs.push((parse_uuid(&uuid_text, "tasks.uuid")?, row.get(1)?));
    }
    Ok(pairs)
}

fn scope_order_values(conn: &Connection, scope: &ScopeKey) -> RepoResult<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT order_value
         FROM tasks
         WHERE scope_key = ?1
         ORDER BY order_value ASC;",
    )?;
    let mut rows = stmt.query([scope.encode()])?;

    let mut keys = Vec::new();
    while let Some(row) = rows.next()? {
        keys.push(row.get(0)?);
    }
    Ok(keys)
}

fn rebalance_order(conn: &Connection, scope: &ScopeKey) -> RepoResult<Vec<TaskId>> {
    let mut stmt = conn.prepare(
        "SELECT uuid
         FROM tasks
         WHERE scope_key = ?1
         ORDER BY order_value ASC, created_at ASC, uuid ASC;",
    )?;
    let mut rows = stmt.query([scope.encode()])?;

    let mut ids = Vec::new();
    while let Some(row) = rows.next()? {
        let uuid_text: String = row.get(0)?;
        ids.push(parse_uuid(&uuid_text, "tasks.uuid")?);
    }
    Ok(ids)
}

fn max_order_value(conn: &Connection, scope: &ScopeKey) -> RepoResult<Option<i64>> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(order_value) FROM tasks WHERE scope_key = ?1;",
        [scope.encode()],
        |row| row.get(0),
    )?;
    Ok(max)
}

fn load_task(conn: &Connection, id: TaskId) -> RepoResult<Option<Task>> {
    let mut stmt = conn.prepare(&format!("{TASK_SELECT_SQL} WHERE uuid = ?1;"))?;
    let mut rows = stmt.query([id.to_string()])?;
    if let Some(row) = rows.next()? {
        return Ok(Some(parse_task_row(row)?));
    }
    Ok(None)
}

fn load_required_task(conn: &Connection, id: TaskId) -> RepoResult<Task> {
    load_task(conn, id)?.ok_or(RepoError::TaskNotFound(id))
}

fn parse_task_row(row: &Row<'_>) -> RepoResult<Task> {
    let uuid_text: String = row.get("uuid")?;
    let uuid = parse_uuid(&uuid_text, "tasks.uuid")?;

    let scope_text: String = row.get("scope_key")?;
    let scope = ScopeKey::parse(&scope_text)
        .map_err(|err| RepoError::InvalidData(format!("tasks.scope_key: {err}")))?;

    let project_text: String = row.get("project_uuid")?;
    if project_text != scope.project.to_string() {
        return Err(RepoError::InvalidData(format!(
            "tasks.project_uuid `{project_text}` disagrees with scope `{scope_text}`"
        )));
    }

    Ok(Task {
        uuid,
        scope,
        title: row.get("title")?,
        order_value: row.get("order_value")?,
        version: row.get("version")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn parse_uuid(value: &str, column: &'static str) -> RepoResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| RepoError::InvalidData(format!("invalid uuid `{value}` in {column}")))
}

fn map_order_write_error(err: rusqlite::Error, scope: &ScopeKey, order_value: i64) -> RepoError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        if failure.code == ErrorCode::ConstraintViolation {
            return RepoError::DuplicateOrderValue {
                scope: scope.encode(),
                order_value,
            };
        }
    }
    err.into()
}

fn ensure_task_connection_ready(conn: &Connection) -> RepoResult<()> {
    let expected_version = latest_version();
    let actual_version: u32 = conn.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
    if actual_version != expected_version {
        return Err(RepoError::UninitializedConnection {
            expected_version,
            actual_version,
        });
    }

    if !table_exists(conn, "tasks")? {
        return Err(RepoError::MissingRequiredTable("tasks"));
    }

    for column in [
        "uuid",
        "project_uuid",
        "scope_key",
        "title",
        "order_value",
        "version",
        "created_at",
        "updated_at",
    ] {
        if !table_has_column(conn, "tasks", column)? {
            return Err(RepoError::MissingRequiredColumn {
                table: "tasks",
                column,
            });
        }
    }

    Ok(())
}

fn table_exists(conn: &Connection, table: &str) -> RepoResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = ?1
        );",
        [table],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> RepoResult<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table});"))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let current: String = row.get(1)?;
        if current == column {
            return Ok(true);
        }
    }
    Ok(false)
}
