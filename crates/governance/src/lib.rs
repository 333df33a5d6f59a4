//! Agreement governance for the gridbroker producer agent
//!
//! A long-lived supervisor that reacts to lifecycle events from the
//! container runtime, the content-fetch channel, the API, and blockchain
//! funding; drives established agreements through their state machine over
//! the persistent store; detects timeouts, external cancellations, and
//! runtime failures; and runs the multi-stage cancellation protocol
//! idempotently under concurrent retries.

mod backoff;
mod cancel;
mod commands;
mod context;
mod finalize;
mod maintain;
mod worker;

pub use worker::*;

use gridbroker_persistence::StoreError;

/// Longest a contract may stay unconfigured by the provider, minutes
/// (reserved).
pub const MAX_UNCONFIGURED_M: u64 = 20;

/// Longest an accepted agreement may wait for its workload to launch,
/// minutes.
pub const MAX_PRELAUNCH_M: u64 = 60;

/// Longest a metered workload may run unpaid, minutes (reserved).
pub const MAX_UNPAID_RUN_M: u64 = 60;

/// Longest to wait for acceptance once workloads are running, minutes
/// (reserved).
pub const MAX_ACCEPTANCE_WAIT_M: u64 = 20;

/// Commands buffered between the event sink and the command processor.
/// Producers block when it fills, which backpressures the event dispatcher.
pub const COMMAND_QUEUE_CAPACITY: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum GovernanceError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

pub(crate) fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp() as u64
}
