use std::cell::Cell;
use std::rc::Rc;

use taskrail_core::db::open_db_in_memory;
use taskrail_core::{
    CommittedReorder, OrderDelta, ReorderError, ReorderRequest, ReorderService, RepoError,
    RepoResult, ScopeKey, SqliteTaskRepository, Task, TaskId, TaskRepository,
};
use uuid::Uuid;

fn setup() -> rusqlite::Connection {
    open_db_in_memory().unwrap()
}

fn force_order_value(conn: &rusqlite::Connection, id: TaskId, order_value: i64) {
    conn.execute(
        "UPDATE tasks SET order_value = ?2 WHERE uuid = ?1;",
        rusqlite::params![id.to_string(), order_value],
    )
    .unwrap();
}

fn scope_keys(service: &ReorderService<SqliteTaskRepository<'_>>, scope: &ScopeKey) -> Vec<i64> {
    service
        .list_scope(scope)
        .unwrap()
        .iter()
        .map(|task| task.order_value)
        .collect()
}

fn assert_strictly_increasing(keys: &[i64]) {
    for pair in keys.windows(2) {
        assert!(pair[0] < pair[1], "keys not strictly increasing: {keys:?}");
    }
}

#[test]
fn created_tasks_append_with_spacing_from_initial_key() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let first = service.create_task(&scope, "one").unwrap();
    let second = service.create_task(&scope, "two").unwrap();
    let third = service.create_task(&scope, "three").unwrap();

    assert_eq!(first.order_value, 1000);
    assert_eq!(second.order_value, 1100);
    assert_eq!(third.order_value, 1200);
    assert_eq!(first.version, 1);
}

#[test]
fn insert_between_two_siblings_takes_the_midpoint() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let item0 = service.create_task(&scope, "item0").unwrap();
    let item1 = service.create_task(&scope, "item1").unwrap();
    let item2 = service.create_task(&scope, "item2").unwrap();
    let new_item = service.create_task(&scope, "new").unwrap();

    let committed = service
        .insert_at(new_item.uuid, &scope, Some(item1.uuid), Some(item2.uuid))
        .unwrap();
    assert_eq!(committed.order_value, 1150);

    let visible: Vec<TaskId> = service
        .list_scope(&scope)
        .unwrap()
        .iter()
        .map(|task| task.uuid)
        .collect();
    assert_eq!(
        visible,
        vec![item0.uuid, item1.uuid, new_item.uuid, item2.uuid]
    );
    assert_strictly_increasing(&scope_keys(&service, &scope));
}

#[test]
fn adjacent_siblings_force_rebalance_then_midpoint_insert() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = service.create_task(&scope, "a").unwrap();
    let b = service.create_task(&scope, "b").unwrap();
    force_order_value(&conn, b.uuid, 1001);
    let c = service.create_task(&scope, "c").unwrap();

    let committed = service
        .insert_at(c.uuid, &scope, Some(a.uuid), Some(b.uuid))
        .unwrap();

    // The no-gap signal triggered a rebalance (a -> 1000, b -> 1100)
    // before the retried allocation landed on the midpoint.
    assert_eq!(committed.order_value, 1050);
    assert_eq!(scope_keys(&service, &scope), vec![1000, 1050, 1100]);

    let visible: Vec<TaskId> = service
        .list_scope(&scope)
        .unwrap()
        .iter()
        .map(|task| task.uuid)
        .collect();
    assert_eq!(visible, vec![a.uuid, c.uuid, b.uuid]);
}

#[test]
fn collapsed_gap_after_insert_rebalances_in_the_same_commit() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = service.create_task(&scope, "a").unwrap();
    let b = service.create_task(&scope, "b").unwrap();
    let c = service.create_task(&scope, "c").unwrap();
    force_order_value(&conn, b.uuid, 1002);
    force_order_value(&conn, c.uuid, 1302);
    let d = service.create_task(&scope, "d").unwrap();

    // Midpoint of (1000, 1002) is 1001; the resulting gaps of 1 trip the
    // detector, so the commit carries the whole rebalanced scope.
    let committed = service
        .insert_at(d.uuid, &scope, Some(a.uuid), Some(b.uuid))
        .unwrap();

    assert_eq!(scope_keys(&service, &scope), vec![1000, 1100, 1200, 1300]);
    assert_eq!(committed.order_value, 1100);
    assert_eq!(committed.deltas.len(), 4);

    let visible: Vec<TaskId> = service
        .list_scope(&scope)
        .unwrap()
        .iter()
        .map(|task| task.uuid)
        .collect();
    assert_eq!(visible, vec![a.uuid, d.uuid, b.uuid, c.uuid]);
}

#[test]
fn append_request_moves_task_to_end_of_its_scope() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = service.create_task(&scope, "a").unwrap();
    let b = service.create_task(&scope, "b").unwrap();

    let committed = service
        .submit(&ReorderRequest::Append {
            task: a.uuid,
            scope,
        })
        .unwrap();
    assert_eq!(committed.order_value, 1200);

    let visible: Vec<TaskId> = service
        .list_scope(&scope)
        .unwrap()
        .iter()
        .map(|task| task.uuid)
        .collect();
    assert_eq!(visible, vec![b.uuid, a.uuid]);
}

#[test]
fn rebalance_is_idempotent_and_preserves_relative_order() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::column(Uuid::new_v4(), Uuid::new_v4());

    let a = repo.create_task(&scope, "a").unwrap();
    let b = repo.create_task(&scope, "b").unwrap();
    let c = repo.create_task(&scope, "c").unwrap();
    force_order_value(&conn, a.uuid, 3);
    force_order_value(&conn, b.uuid, 7);
    force_order_value(&conn, c.uuid, 9000);

    repo.rebalance_scope(&scope).unwrap();
    let first_pass: Vec<(TaskId, i64)> = repo.find_sibling_keys(&scope).unwrap();
    assert_eq!(
        first_pass,
        vec![(a.uuid, 1000), (b.uuid, 1100), (c.uuid, 1200)]
    );

    repo.rebalance_scope(&scope).unwrap();
    let second_pass: Vec<(TaskId, i64)> = repo.find_sibling_keys(&scope).unwrap();
    assert_eq!(first_pass, second_pass);
}

#[test]
fn rebalance_initializes_legacy_sentinel_rows() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = repo.create_task(&scope, "a").unwrap();
    let b = repo.create_task(&scope, "b").unwrap();
    force_order_value(&conn, a.uuid, 0);

    // The sentinel sorts first and survives in first position.
    repo.rebalance_scope(&scope).unwrap();
    assert_eq!(
        repo.find_sibling_keys(&scope).unwrap(),
        vec![(a.uuid, 1000), (b.uuid, 1100)]
    );
}

#[test]
fn stale_version_is_rejected_by_the_repository() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let task = repo.create_task(&scope, "a").unwrap();

    let err = repo
        .update_order_value(task.uuid, 5000, task.version + 1)
        .unwrap_err();
    assert!(matches!(err, RepoError::VersionConflict { .. }));

    let new_version = repo
        .update_order_value(task.uuid, 5000, task.version)
        .unwrap();
    assert_eq!(new_version, task.version + 1);
    assert_eq!(repo.get_task(task.uuid).unwrap().unwrap().order_value, 5000);
}

#[test]
fn taking_an_occupied_order_value_reports_a_duplicate() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = repo.create_task(&scope, "a").unwrap();
    let b = repo.create_task(&scope, "b").unwrap();

    let err = repo
        .update_order_value(a.uuid, b.order_value, a.version)
        .unwrap_err();
    assert!(matches!(err, RepoError::DuplicateOrderValue { .. }));
}

#[test]
fn batch_update_swaps_keys_atomically() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = repo.create_task(&scope, "a").unwrap();
    let b = repo.create_task(&scope, "b").unwrap();

    // Swapping through the two-phase batch never trips the unique index.
    repo.batch_update_order_values(
        &scope,
        &[(a.uuid, b.order_value), (b.uuid, a.order_value)],
    )
    .unwrap();
    assert_eq!(
        repo.find_sibling_keys(&scope).unwrap(),
        vec![(b.uuid, 1000), (a.uuid, 1100)]
    );
}

#[test]
fn failed_batch_update_leaves_the_scope_untouched() {
    let conn = setup();
    let repo = SqliteTaskRepository::try_new(&conn).unwrap();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let a = repo.create_task(&scope, "a").unwrap();
    let stranger = Uuid::new_v4();

    let err = repo
        .batch_update_order_values(&scope, &[(a.uuid, 5000), (stranger, 6000)])
        .unwrap_err();
    assert!(matches!(err, RepoError::TaskNotInScope { .. }));

    assert_eq!(
        repo.find_sibling_keys(&scope).unwrap(),
        vec![(a.uuid, 1000)]
    );
}

#[test]
fn engine_errors_carry_typed_variants() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::children(Uuid::new_v4(), None);
    let other_scope = ScopeKey::children(Uuid::new_v4(), None);

    let task = service.create_task(&scope, "a").unwrap();
    let outsider = service.create_task(&other_scope, "b").unwrap();

    let err = service
        .insert_at(Uuid::new_v4(), &scope, None, None)
        .unwrap_err();
    assert!(matches!(err, ReorderError::TaskNotFound(_)));

    let err = service
        .insert_at(task.uuid, &other_scope, None, None)
        .unwrap_err();
    assert!(matches!(err, ReorderError::ScopeNotFound { .. }));

    let err = service
        .insert_at(task.uuid, &scope, Some(outsider.uuid), None)
        .unwrap_err();
    assert!(matches!(err, ReorderError::TaskNotFound(id) if id == outsider.uuid));
}

/// Repository double whose reorder operations fail the way a folded
/// rebalance does, without touching storage. Reads delegate to a real
/// repository over the same connection.
struct RebalancelessRepo<'conn> {
    inner: SqliteTaskRepository<'conn>,
    attempts: Rc<Cell<u32>>,
}

impl RebalancelessRepo<'_> {
    fn fail(&self, scope: &ScopeKey) -> RepoError {
        self.attempts.set(self.attempts.get() + 1);
        RepoError::RebalanceFailed {
            scope: scope.encode(),
            source: Box::new(RepoError::InvalidData(
                "batch order write rejected".to_string(),
            )),
        }
    }
}

impl TaskRepository for RebalancelessRepo<'_> {
    fn create_task(&self, scope: &ScopeKey, title: &str) -> RepoResult<Task> {
        self.inner.create_task(scope, title)
    }

    fn get_task(&self, id: TaskId) -> RepoResult<Option<Task>> {
        self.inner.get_task(id)
    }

    fn list_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<Task>> {
        self.inner.list_scope(scope)
    }

    fn find_sibling_keys(&self, scope: &ScopeKey) -> RepoResult<Vec<(TaskId, i64)>> {
        self.inner.find_sibling_keys(scope)
    }

    fn update_order_value(
        &self,
        id: TaskId,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64> {
        self.inner.update_order_value(id, new_order, expected_version)
    }

    fn batch_update_order_values(
        &self,
        scope: &ScopeKey,
        assignments: &[(TaskId, i64)],
    ) -> RepoResult<()> {
        self.inner.batch_update_order_values(scope, assignments)
    }

    fn update_task_scope_and_order(
        &self,
        id: TaskId,
        new_scope: &ScopeKey,
        new_order: i64,
        expected_version: i64,
    ) -> RepoResult<i64> {
        self.inner
            .update_task_scope_and_order(id, new_scope, new_order, expected_version)
    }

    fn rebalance_scope(&self, scope: &ScopeKey) -> RepoResult<Vec<OrderDelta>> {
        Err(self.fail(scope))
    }

    fn insert_at(
        &self,
        _id: TaskId,
        scope: &ScopeKey,
        _before: Option<TaskId>,
        _after: Option<TaskId>,
        _expected_version: i64,
    ) -> RepoResult<CommittedReorder> {
        Err(self.fail(scope))
    }

    fn move_across_scope(
        &self,
        _id: TaskId,
        _source: &ScopeKey,
        target: &ScopeKey,
        _before: Option<TaskId>,
        _after: Option<TaskId>,
        _expected_version: i64,
    ) -> RepoResult<CommittedReorder> {
        Err(self.fail(target))
    }
}

#[test]
fn failed_rebalance_surfaces_without_retry_and_leaves_the_scope_unchanged() {
    let conn = setup();
    let scope = ScopeKey::children(Uuid::new_v4(), None);

    let (task, baseline) = {
        let repo = SqliteTaskRepository::try_new(&conn).unwrap();
        let a = repo.create_task(&scope, "a").unwrap();
        repo.create_task(&scope, "b").unwrap();
        (a.uuid, repo.find_sibling_keys(&scope).unwrap())
    };

    let attempts = Rc::new(Cell::new(0));
    let service = ReorderService::new(RebalancelessRepo {
        inner: SqliteTaskRepository::try_new(&conn).unwrap(),
        attempts: Rc::clone(&attempts),
    });

    let err = service.insert_at(task, &scope, None, None).unwrap_err();
    assert!(matches!(err, ReorderError::RebalanceFailed { .. }));
    // A rebalance failure is not a concurrency conflict; it surfaces on
    // the first attempt instead of being retried.
    assert_eq!(attempts.get(), 1);

    let verify = SqliteTaskRepository::try_new(&conn).unwrap();
    assert_eq!(verify.find_sibling_keys(&scope).unwrap(), baseline);
}

#[test]
fn keys_stay_strictly_increasing_under_mixed_reordering() {
    let conn = setup();
    let service = ReorderService::new(SqliteTaskRepository::try_new(&conn).unwrap());
    let scope = ScopeKey::column(Uuid::new_v4(), Uuid::new_v4());

    let tasks: Vec<_> = (0..6)
        .map(|i| service.create_task(&scope, format!("t{i}")).unwrap())
        .collect();

    // Repeatedly squeeze tasks into the same gap to degrade spacing.
    for round in 0..8 {
        let ordered = service.list_scope(&scope).unwrap();
        let mover = tasks[round % tasks.len()].uuid;
        let anchor = ordered
            .iter()
            .find(|task| task.uuid != mover)
            .unwrap()
            .uuid;
        service
            .insert_at(mover, &scope, Some(anchor), None)
            .unwrap();

        let keys = scope_keys(&service, &scope);
        assert_strictly_increasing(&keys);
        assert!(keys.iter().all(|key| *key >= 1));
    }
}
