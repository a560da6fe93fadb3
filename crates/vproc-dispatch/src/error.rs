//! Dispatch error types.

use thiserror::Error;

use vproc_models::JobId;
use vproc_queue::QueueError;
use vproc_store::StoreError;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("missing or invalid field: {0}")]
    MissingField(String),

    #[error("invalid resolution: {0}")]
    InvalidResolution(String),

    #[error("job record not found: {0}")]
    NotFound(JobId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),
}
