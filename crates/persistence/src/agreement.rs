use gridbroker_types::Deployment;
use serde::{Deserialize, Serialize};

/// Persistent record of an agreement this producer has entered.
///
/// Timestamps are seconds since epoch, 0 meaning unset, and are monotone in
/// declaration order with one exception: `terminated_time` may be set while
/// `execution_start_time` or `finalized_time` are still 0 (early
/// cancellation). Once `archived` flips true the record never changes again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EstablishedAgreement {
    pub agreement_id: String,
    pub agreement_protocol: String,

    /// On-chain address of the consumer; empty until the proposal is
    /// accepted. Records with an empty address are invisible to the
    /// governance loops.
    pub counterparty_address: String,

    /// Serialized proposal and its signature, inputs to on-chain
    /// verification.
    pub proposal: String,
    pub proposal_sig: String,

    pub creation_time: u64,
    pub accepted_time: u64,
    pub execution_start_time: u64,
    pub finalized_time: u64,
    pub terminated_time: u64,

    /// Running services, populated when execution starts.
    pub current_deployment: Deployment,

    pub archived: bool,
}

impl EstablishedAgreement {
    /// A record as the negotiation subsystem creates it, before acceptance.
    pub fn new(
        agreement_id: impl Into<String>,
        agreement_protocol: impl Into<String>,
        proposal: impl Into<String>,
        proposal_sig: impl Into<String>,
        creation_time: u64,
    ) -> Self {
        Self {
            agreement_id: agreement_id.into(),
            agreement_protocol: agreement_protocol.into(),
            counterparty_address: String::new(),
            proposal: proposal.into(),
            proposal_sig: proposal_sig.into(),
            creation_time,
            accepted_time: 0,
            execution_start_time: 0,
            finalized_time: 0,
            terminated_time: 0,
            current_deployment: Deployment::new(),
            archived: false,
        }
    }

    /// Whether the producer has committed but the chain record is unverified.
    pub fn pending_finalization(&self) -> bool {
        self.accepted_time != 0 && self.finalized_time == 0 && self.terminated_time == 0
    }

    /// Whether cancellation has begun.
    pub fn terminated(&self) -> bool {
        self.terminated_time != 0
    }
}

/// Predicate applied during a filtered store scan.
pub type AgreementFilter = Box<dyn Fn(&EstablishedAgreement) -> bool + Send + Sync>;

/// Records the terminal archive step has not yet claimed.
pub fn unarchived_filter() -> AgreementFilter {
    Box::new(|a| !a.archived)
}
