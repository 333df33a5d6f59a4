use crate::Deployment;

/// Discriminator carried by every event on the internal buses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventId {
    EdgeRegistered,
    ExecutionBegun,
    ExecutionFailed,
    FetchFailed,
    AgreementEnded,
    AccountFunded,
    AgreementReached,
    PolicyUpdated,
    ContainerMaintain,
}

/// Where a cancellation request originated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelSource {
    /// Another subsystem inside the agent.
    Internal,
    /// The node operator, through the local API.
    Api,
}

/// Events flowing into the governance core from peer subsystems.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// The device completed registration with the exchange registry.
    EdgeRegistered { token: String },

    /// The container runtime launched the workload for an agreement.
    ExecutionBegun {
        protocol: String,
        agreement_id: String,
        deployment: Deployment,
    },

    /// The container runtime reported the workload failed.
    ExecutionFailed {
        protocol: String,
        agreement_id: String,
        deployment: Option<Deployment>,
    },

    /// The content-fetch channel could not deliver the workload artifacts.
    FetchFailed {
        protocol: String,
        agreement_id: String,
    },

    /// Someone asked for the agreement to end.
    CancellationRequested {
        source: CancelSource,
        protocol: String,
        agreement_id: String,
        deployment: Option<Deployment>,
    },

    /// The blockchain account backing this producer now holds funds.
    AccountFunded { account: String },

    /// Peer chatter the governance core does not consume.
    AgreementReached {
        protocol: String,
        agreement_id: String,
    },
    PolicyUpdated { name: String },
}

impl InboundEvent {
    pub fn id(&self) -> EventId {
        match self {
            InboundEvent::EdgeRegistered { .. } => EventId::EdgeRegistered,
            InboundEvent::ExecutionBegun { .. } => EventId::ExecutionBegun,
            InboundEvent::ExecutionFailed { .. } => EventId::ExecutionFailed,
            InboundEvent::FetchFailed { .. } => EventId::FetchFailed,
            InboundEvent::CancellationRequested { .. } => EventId::AgreementEnded,
            InboundEvent::AccountFunded { .. } => EventId::AccountFunded,
            InboundEvent::AgreementReached { .. } => EventId::AgreementReached,
            InboundEvent::PolicyUpdated { .. } => EventId::PolicyUpdated,
        }
    }
}

/// Events the governance core emits for peer subsystems.
#[derive(Debug, Clone)]
pub enum OutboundEvent {
    /// The agreement is terminated; peers should tear the workload down.
    Cancellation {
        protocol: String,
        agreement_id: String,
        deployment: Option<Deployment>,
    },

    /// Liveness probe trigger for a running agreement's containers.
    Maintenance {
        protocol: String,
        agreement_id: String,
        deployment: Deployment,
    },
}

impl OutboundEvent {
    pub fn id(&self) -> EventId {
        match self {
            OutboundEvent::Cancellation { .. } => EventId::AgreementEnded,
            OutboundEvent::Maintenance { .. } => EventId::ContainerMaintain,
        }
    }

    pub fn agreement_id(&self) -> &str {
        match self {
            OutboundEvent::Cancellation { agreement_id, .. } => agreement_id,
            OutboundEvent::Maintenance { agreement_id, .. } => agreement_id,
        }
    }
}
