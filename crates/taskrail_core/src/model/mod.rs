//! Domain model for ordered tasks and their ordering scopes.
//!
//! # Responsibility
//! - Define canonical data structures used by the ordering engine.
//! - Keep scope identity and its persisted encoding in one place.
//!
//! # Invariants
//! - Every task is identified by a stable `TaskId`.
//! - A task belongs to exactly one `ScopeKey` at any instant.

pub mod scope;
pub mod task;
