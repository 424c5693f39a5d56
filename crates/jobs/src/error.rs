//! Errors surfaced by job operations.

use thiserror::Error;

use agendum_core::{DomainError, JobId};

use crate::store::JobStoreError;

/// Failure of a job operation that the caller must handle.
///
/// Handler failures never appear here; they are recorded on the job by `fail`.
#[derive(Debug, Error)]
pub enum JobError {
    /// The store rejected or could not perform a read/write.
    #[error(transparent)]
    Store(#[from] JobStoreError),

    /// Invalid configuration passed to a lifecycle operation.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The job was removed; it can no longer be saved or run.
    #[error("job was removed (id: {0:?})")]
    Removed(Option<JobId>),
}

pub type JobResult<T> = Result<T, JobError>;
