//! Transaction Manager
//!
//! Begin / record-applied / commit / rollback over [`DocumentState`](crate::model::DocumentState).
//! Every completed operation carries the data needed to invert it, and a
//! session-scoped backup is captured before the first mutation.

pub mod manager;
pub mod operation;
pub mod transaction;

pub use manager::{RollbackRecord, RollbackResult, TransactionManager};
pub use operation::{AppliedData, Operation, OperationKind, PlannedOperation};
pub use transaction::{Transaction, TransactionStatus};
