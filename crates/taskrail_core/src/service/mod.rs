//! Core use-case services.
//!
//! # Responsibility
//! - Orchestrate repository operations behind stable engine entry
//!   points for thin request handlers.
//! - Own the conflict retry policy and the committed-delta event fan-out.
//!
//! # Invariants
//! - Services never bypass repository transaction boundaries.
//! - A stale-version conflict is retried exactly once with fresh state.

pub mod reorder_service;
