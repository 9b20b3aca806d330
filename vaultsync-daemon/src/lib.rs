//! Sidecar runtime: interval-driven sync loop + signal handler.

mod error;
mod runtime;

pub use error::DaemonError;
pub use runtime::{
    build_reconciler, init_tracing, run, serve, start_blocking, sync_cycle, sync_once,
    DaemonConfig, FailurePolicy, DEFAULT_GRACE,
};
