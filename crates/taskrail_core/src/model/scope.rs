//! Ordering scope identity and its canonical text encoding.
//!
//! # Responsibility
//! - Identify the set of tasks that are mutually ordered.
//! - Provide the stable `encode`/`parse` pair used as the persisted
//!   `scope_key` column.
//!
//! # Invariants
//! - Scopes are disjoint: one task is ordered in exactly one scope.
//! - `parse(encode(k)) == k` for every well-formed scope key.
//! - The encoding is opaque to SQL beyond equality comparison.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable identifier for an ordered task.
pub type TaskId = Uuid;

/// Stable identifier for the containing project.
pub type ProjectId = Uuid;

/// Stable identifier for a status column (kanban lane).
pub type ColumnId = Uuid;

/// The ordering dimension inside one project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lane {
    /// Hierarchical ordering: children of one parent task, or of the
    /// project root when `None`.
    Children(Option<TaskId>),
    /// Column-based ordering for kanban boards.
    Column(ColumnId),
}

/// Identity of one ordering scope: a project plus one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    /// Containing project.
    pub project: ProjectId,
    /// Ordering dimension within the project.
    pub lane: Lane,
}

/// Error raised when a persisted scope key cannot be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeKeyParseError {
    value: String,
    reason: &'static str,
}

impl Display for ScopeKeyParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "invalid scope key `{}`: {}", self.value, self.reason)
    }
}

impl Error for ScopeKeyParseError {}

impl ScopeKey {
    /// Creates a hierarchical scope (children of `parent`, or project root).
    pub fn children(project: ProjectId, parent: Option<TaskId>) -> Self {
        Self {
            project,
            lane: Lane::Children(parent),
        }
    }

    /// Creates a column (kanban) scope.
    pub fn column(project: ProjectId, column: ColumnId) -> Self {
        Self {
            project,
            lane: Lane::Column(column),
        }
    }

    /// Canonical persisted form, e.g.
    /// `"{project}/children/root"`, `"{project}/children/{task}"`,
    /// `"{project}/column/{column}"`.
    pub fn encode(&self) -> String {
        match self.lane {
            Lane::Children(None) => format!("{}/children/root", self.project),
            Lane::Children(Some(parent)) => format!("{}/children/{parent}", self.project),
            Lane::Column(column) => format!("{}/column/{column}", self.project),
        }
    }

    /// Decodes the canonical persisted form.
    pub fn parse(value: &str) -> Result<Self, ScopeKeyParseError> {
        let reject = |reason| ScopeKeyParseError {
            value: value.to_string(),
            reason,
        };

        let mut parts = value.splitn(3, '/');
        let project = parts.next().ok_or_else(|| reject("missing project"))?;
        let kind = parts.next().ok_or_else(|| reject("missing lane kind"))?;
        let tail = parts.next().ok_or_else(|| reject("missing lane target"))?;

        let project =
            Uuid::parse_str(project).map_err(|_| reject("project is not a valid uuid"))?;

        let lane = match kind {
            "children" if tail == "root" => Lane::Children(None),
            "children" => Lane::Children(Some(
                Uuid::parse_str(tail).map_err(|_| reject("parent is not a valid uuid"))?,
            )),
            "column" => Lane::Column(
                Uuid::parse_str(tail).map_err(|_| reject("column is not a valid uuid"))?,
            ),
            _ => return Err(reject("lane kind must be `children` or `column`")),
        };

        Ok(Self { project, lane })
    }
}

impl Display for ScopeKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.encode())
    }
}
