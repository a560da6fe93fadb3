//! Job producer and status reconciliation.
//!
//! The producer is the only writer that creates job records and broker
//! entries, in that order; the status reconciler is the read path merging
//! the persisted record with the broker's live snapshot; `reconcile`
//! rebuilds a lost broker from the record store at startup.

pub mod error;
pub mod producer;
pub mod reconcile;
pub mod status;

pub use error::{DispatchError, DispatchResult};
pub use producer::{Producer, SubmitReceipt};
pub use reconcile::reconcile;
pub use status::StatusReconciler;
