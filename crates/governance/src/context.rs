use gridbroker_chain::{BaseContracts, ChainAdapter, ChainError};
use gridbroker_config::AgentConfig;
use gridbroker_persistence::AgreementStore;
use gridbroker_registry::AgreementRegistry;
use gridbroker_types::{OutboundEvent, PolicyManager};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::{mpsc, OnceCell, RwLock};
use tracing::warn;

/// Shared handles used by the worker, the periodic loops, and the
/// cancellation pipeline. The config and policy manager are owned by the
/// top-level agent and outlive the worker.
pub(crate) struct GovernanceContext {
    pub config: Arc<AgentConfig>,
    pub store: Arc<dyn AgreementStore>,
    pub registry: Arc<dyn AgreementRegistry>,
    pub chain: Arc<dyn ChainAdapter>,

    /// Held for the protocol handlers; governance itself never edits
    /// policies.
    #[allow(dead_code)]
    pub policy_manager: Arc<PolicyManager>,

    pub outbound: mpsc::Sender<OutboundEvent>,

    pub device_id: String,
    pub device_token: RwLock<String>,

    /// Flips true once the blockchain account is funded; the command
    /// processor and the loops hold until then.
    pub bc_writes_enabled: AtomicBool,

    /// Platform contract bindings, resolved lazily on first use.
    contracts: OnceCell<BaseContracts>,
}

impl GovernanceContext {
    pub fn new(
        config: Arc<AgentConfig>,
        store: Arc<dyn AgreementStore>,
        registry: Arc<dyn AgreementRegistry>,
        chain: Arc<dyn ChainAdapter>,
        policy_manager: Arc<PolicyManager>,
        outbound: mpsc::Sender<OutboundEvent>,
        device_id: String,
        device_token: String,
    ) -> Self {
        Self {
            config,
            store,
            registry,
            chain,
            policy_manager,
            outbound,
            device_id,
            device_token: RwLock::new(device_token),
            bc_writes_enabled: AtomicBool::new(false),
            contracts: OnceCell::new(),
        }
    }

    pub async fn registry_token(&self) -> String {
        self.device_token.read().await.clone()
    }

    /// The contract bindings, resolving them on first call. Resolution
    /// failures are returned so callers can retry on their own cadence.
    pub async fn contracts(&self) -> Result<&BaseContracts, ChainError> {
        self.contracts
            .get_or_try_init(|| self.chain.init_contracts())
            .await
    }

    pub async fn emit(&self, event: OutboundEvent) {
        if self.outbound.send(event).await.is_err() {
            warn!("outbound event channel closed, dropping event");
        }
    }
}
