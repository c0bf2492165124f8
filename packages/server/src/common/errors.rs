//! The coordinator's closed error taxonomy.
//!
//! CRUD and Coordinator operations return `CoordinatorError`; binaries, CLI glue,
//! and test setup use `anyhow::Result` the way the rest of the ambient stack does.

use thiserror::Error;

use crate::domains::recurrence::job::DeadLetterErrorType;

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("list not found: {0}")]
    ListNotFound(String),

    #[error("item not found: {0}")]
    ItemNotFound(String),

    #[error("template not found: {0}")]
    TemplateNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    #[error("exception not found: {0}")]
    ExceptionNotFound(String),

    #[error("dead letter row not found: {0}")]
    DeadLetterNotFound(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: i64, actual: i64 },

    #[error("an exception already exists for this template at this occurrence")]
    ExceptionAlreadyExists,

    #[error("job {0} is not in a cancellable state")]
    JobNotCancellable(String),

    #[error("job {0} is no longer owned by this worker")]
    JobOwnershipLost(String),

    #[error("job {0} is already claimed")]
    JobAlreadyClaimed(String),

    #[error("job {job_id} has unsupported status {status}")]
    UnsupportedJobStatus { job_id: String, status: String },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),
}

/// A job-side failure classified for dead-letter routing.
#[derive(Debug, Error)]
pub enum JobFailure {
    #[error("permanent failure: {0}")]
    Permanent(String),

    #[error("retries exhausted: {0}")]
    Exhausted(String),

    #[error("worker panicked: {0}")]
    Panic(String),
}

impl JobFailure {
    pub fn error_type(&self) -> DeadLetterErrorType {
        match self {
            JobFailure::Permanent(_) => DeadLetterErrorType::Permanent,
            JobFailure::Exhausted(_) => DeadLetterErrorType::Exhausted,
            JobFailure::Panic(_) => DeadLetterErrorType::Panic,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            JobFailure::Permanent(m) | JobFailure::Exhausted(m) | JobFailure::Panic(m) => m,
        }
    }
}

/// Maps a raw `sqlx::Error` into a named taxonomy variant when the underlying
/// constraint violation identifies a specific failure mode, falling back to
/// `StorageUnavailable` otherwise.
pub fn classify_db_error(err: sqlx::Error) -> CoordinatorError {
    if let sqlx::Error::Database(ref db_err) = err {
        if let Some(constraint) = db_err.constraint() {
            if constraint.contains("exceptions_template_id_occurs_at") {
                return CoordinatorError::ExceptionAlreadyExists;
            }
        }
    }
    CoordinatorError::StorageUnavailable(err)
}
