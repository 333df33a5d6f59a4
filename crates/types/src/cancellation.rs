use serde::{Deserialize, Serialize};

/// Why an agreement was cancelled. The numeric code is what goes on chain,
/// so the mapping is stable across releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancellationReason {
    /// The counterparty never recorded the agreement on chain in time.
    NotFinalizedTimeout,
    /// The local policy changed underneath the agreement (reserved).
    PolicyChanged,
    /// The workload artifacts could not be fetched.
    TorrentFailure,
    /// The container runtime reported the workload failed.
    ContainerFailure,
    /// The workload never launched within the allowed window.
    NotExecutedTimeout,
    /// An operator or the API asked for the agreement to end.
    UserRequested,
    /// The agreement disappeared from the chain after finalization.
    Discovered,
}

impl CancellationReason {
    /// On-chain reason code.
    pub fn code(&self) -> u32 {
        match self {
            CancellationReason::NotFinalizedTimeout => 100,
            CancellationReason::PolicyChanged => 101,
            CancellationReason::TorrentFailure => 102,
            CancellationReason::ContainerFailure => 103,
            CancellationReason::NotExecutedTimeout => 104,
            CancellationReason::UserRequested => 105,
            CancellationReason::Discovered => 106,
        }
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            100 => Some(CancellationReason::NotFinalizedTimeout),
            101 => Some(CancellationReason::PolicyChanged),
            102 => Some(CancellationReason::TorrentFailure),
            103 => Some(CancellationReason::ContainerFailure),
            104 => Some(CancellationReason::NotExecutedTimeout),
            105 => Some(CancellationReason::UserRequested),
            106 => Some(CancellationReason::Discovered),
            _ => None,
        }
    }
}

impl std::fmt::Display for CancellationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            CancellationReason::NotFinalizedTimeout => "not finalized in time",
            CancellationReason::PolicyChanged => "policy changed",
            CancellationReason::TorrentFailure => "artifact fetch failed",
            CancellationReason::ContainerFailure => "container failed",
            CancellationReason::NotExecutedTimeout => "not executed in time",
            CancellationReason::UserRequested => "user requested",
            CancellationReason::Discovered => "cancelled on chain",
        };
        write!(f, "{} ({})", label, self.code())
    }
}
