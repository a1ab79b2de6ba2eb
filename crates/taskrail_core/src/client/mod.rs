//! Client-side optimistic reordering.
//!
//! # Responsibility
//! - Turn drag gestures into optimistic local reorderings and the
//!   matching server requests.
//! - Reconcile committed keys, or roll back to the pre-drag snapshot on
//!   failure.
//!
//! # Invariants
//! - At most one commit request per scope is in flight at a time;
//!   distinct scopes proceed independently.
//! - A failed commit always restores the last known-good server order.

pub mod coordinator;
