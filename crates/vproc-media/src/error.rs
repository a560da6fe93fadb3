//! Pipeline error types.

use std::path::PathBuf;
use thiserror::Error;

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("pipeline binary not found: {0}")]
    BinaryNotFound(String),

    #[error("input directory missing or empty: {}", .0.display())]
    InputMissing(PathBuf),

    #[error("pipeline timed out after {0} seconds")]
    Timeout(u64),

    #[error("pipeline exited with status {code:?}: {detail}")]
    NonZeroExit { code: Option<i32>, detail: String },

    #[error("error marker in pipeline output: {0}")]
    ErrorMarker(String),

    #[error("pipeline finished without a completion report")]
    MissingReport,

    #[error("pipeline reported failure: {0}")]
    ReportedFailure(String),

    #[error("pipeline produced no artifacts")]
    NoArtifacts,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
