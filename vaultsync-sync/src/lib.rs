//! # vaultsync-sync
//!
//! The reconciliation engine: fetch the remote secret, compare it with the
//! local copy, and atomically replace the file only when it changed.
//!
//! [`Reconciler::run_cycle`] performs one cycle; the daemon decides when.

pub mod error;
pub mod reconcile;
pub mod retry;
pub mod store;

pub use error::SyncError;
pub use reconcile::{CycleOutcome, Reconciler};
pub use retry::RetryPolicy;
pub use store::{fingerprint, LocalStateStore};
