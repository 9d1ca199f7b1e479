use crate::scheduler::SchedulerError;
use redline_core::job::JobId;
use redline_core::storage::StoreError;

/// Errors surfaced to workflow callers.
///
/// Failures inside a step are recorded on the job (`status = error`) rather
/// than returned; these are the errors of the surrounding operations.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("failed to persist job {job_id} ({bytes} bytes): {source}")]
    Persistence {
        job_id: JobId,
        bytes: usize,
        #[source]
        source: StoreError,
    },
    #[error("storage error: {0}")]
    Store(#[from] StoreError),
    #[error("Process not found or expired: {0}")]
    ProcessNotFound(String),
    #[error("invalid submission: {0}")]
    InvalidSubmission(String),
    #[error(transparent)]
    Scheduling(#[from] SchedulerError),
}
