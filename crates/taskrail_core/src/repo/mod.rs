//! Repository layer abstractions and persistence implementations.
//!
//! # Responsibility
//! - Define the persistence contract the ordering engine consumes.
//! - Isolate SQLite query and transaction details from service
//!   orchestration.
//!
//! # Invariants
//! - Every read-then-write ordering operation runs inside one immediate
//!   transaction; rebalancing always rides the triggering transaction.
//! - Repository APIs return semantic errors (`TaskNotFound`,
//!   `VersionConflict`) in addition to DB transport errors.

pub mod task_repo;
