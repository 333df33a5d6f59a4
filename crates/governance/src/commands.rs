use gridbroker_types::{CancellationReason, Deployment};

/// Work items the event sink enqueues for the serial command processor.
#[derive(Debug, Clone)]
pub(crate) enum Command {
    /// Adopt a fresh registry token from a (re-)registration.
    DeviceRegistered { token: String },

    /// Containers for the agreement are running; start governing them.
    StartGovernExecution {
        protocol: String,
        agreement_id: String,
        deployment: Deployment,
    },

    /// Tear the agreement down across every sink.
    CleanupExecution {
        protocol: String,
        agreement_id: String,
        reason: CancellationReason,
        deployment: Option<Deployment>,
    },
}
