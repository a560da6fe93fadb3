//! Shared data models for the vproc backend.
//!
//! This crate defines the job record, its lifecycle status machine, the
//! target resolution enum, and the submit-request shape shared by the
//! producer, broker, store, and worker crates.

pub mod job;
pub mod resolution;
pub mod submit;

pub use job::{JobId, JobRecord, JobStatus};
pub use resolution::{ParseResolutionError, Resolution};
pub use submit::SubmitRequest;
