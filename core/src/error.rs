//! The error taxonomy for the task generator core.
//!
//! Each variant maps to one row of the error taxonomy table: some are fatal to
//! the operation that raised them, others (`CorruptLine`, analyzer abstention)
//! are absorbed by the caller and never bubble past this crate.

use thiserror::Error;

/// Raised by the event reader only on directory-not-found or permission
/// denial. Individual corrupt lines never raise this — they are counted and
/// skipped, see [`crate::event::LoadOutcome::corrupt_lines`].
#[derive(Debug, Error)]
pub enum EventReadError {
    #[error("telemetry directory not found: {0}")]
    DirNotFound(std::path::PathBuf),

    #[error("permission denied reading telemetry directory: {0}")]
    PermissionDenied(std::path::PathBuf),

    #[error("io error reading telemetry: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by `TaskCard::validate`.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    #[error("acceptance criteria must be non-empty")]
    EmptyAcceptanceCriteria,

    #[error("confidence {0} out of range [0, 1]")]
    ConfidenceOutOfRange(String),

    #[error("evidence summary must be non-empty")]
    EmptyEvidenceSummary,
}

/// Raised when a lookup by id fails (task store, template registry).
#[derive(Debug, Error)]
#[error("not found: {0}")]
pub struct NotFoundError(pub String);

/// Raised when a status transition violates invariant I2.
#[derive(Debug, Error)]
#[error("illegal transition for task {id}: {from} -> {to}")]
pub struct ConflictError {
    pub id: String,
    pub from: String,
    pub to: String,
}
