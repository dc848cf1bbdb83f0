//! Shared error types that drive exit-code mapping.

use thiserror::Error;

/// Exit code reserved for "conflict — resolve and run continue".
pub const EXIT_CONFLICT: i32 = 3;

/// A rebase stopped on unmerged paths and a continuation was persisted.
///
/// Commands print the full conflict guidance themselves before returning
/// this; main maps it to [`EXIT_CONFLICT`] without re-printing.
#[derive(Debug, Error)]
#[error("rebase of '{0}' stopped on conflicts")]
pub struct ConflictPending(pub String);
