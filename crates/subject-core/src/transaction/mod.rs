//! Transaction dispatch: pushing committed writes out to bound sources.

pub mod dispatcher;

pub use dispatcher::{dispatch, PendingWrite, Transaction, TransactionMode, TransactionOutcome};
