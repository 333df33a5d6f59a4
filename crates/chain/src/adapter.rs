use async_trait::async_trait;
use gridbroker_types::{CancellationReason, Policy};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("contract lookup failed: {0}")]
    ContractLookup(String),

    #[error("encoding error: {0}")]
    Encoding(String),
}

/// Addresses of the platform contracts, resolved once from the on-chain
/// directory and then passed into every verification and termination call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseContracts {
    pub directory: String,
    pub agreements: String,
}

/// The blockchain operations the governance core consumes.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    /// Resolve the platform contract bindings.
    async fn init_contracts(&self) -> Result<BaseContracts, ChainError>;

    /// Whether the agreement is recorded on chain for this counterparty.
    async fn verify_agreement_recorded(
        &self,
        agreement_id: &str,
        counterparty_address: &str,
        proposal_sig: &str,
        contracts: &BaseContracts,
    ) -> Result<bool, ChainError>;

    /// Submit the producer-side termination of an agreement.
    async fn terminate_agreement(
        &self,
        producer_policy: &Policy,
        counterparty_address: &str,
        agreement_id: &str,
        reason: CancellationReason,
        contracts: &BaseContracts,
    ) -> Result<(), ChainError>;
}

/// Mock chain for tests: a settable set of recorded agreements plus call
/// accounting, so tests can assert how often the adapter was touched.
#[derive(Default)]
pub struct MockChainAdapter {
    recorded: Arc<RwLock<HashSet<String>>>,
    verify_calls: Arc<RwLock<Vec<String>>>,
    terminate_calls: Arc<RwLock<Vec<(String, u32)>>>,
    fail_verify: AtomicBool,
    init_failures_remaining: AtomicU32,
    init_calls: AtomicU32,
}

impl MockChainAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an agreement as recorded on chain.
    pub fn set_recorded(&self, agreement_id: &str) {
        self.recorded
            .write()
            .unwrap()
            .insert(agreement_id.to_string());
    }

    /// Simulate the counterparty cancelling on chain.
    pub fn clear_recorded(&self, agreement_id: &str) {
        self.recorded.write().unwrap().remove(agreement_id);
    }

    /// Make verification calls error, as an unreachable node would.
    pub fn set_fail_verify(&self, fail: bool) {
        self.fail_verify.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `count` contract initializations.
    pub fn fail_init_times(&self, count: u32) {
        self.init_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn init_count(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn verify_count(&self, agreement_id: &str) -> usize {
        self.verify_calls
            .read()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == agreement_id)
            .count()
    }

    pub fn terminate_count(&self, agreement_id: &str) -> usize {
        self.terminate_calls
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == agreement_id)
            .count()
    }

    pub fn terminate_reasons(&self, agreement_id: &str) -> Vec<u32> {
        self.terminate_calls
            .read()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == agreement_id)
            .map(|(_, reason)| *reason)
            .collect()
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    async fn init_contracts(&self) -> Result<BaseContracts, ChainError> {
        self.init_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.init_failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.init_failures_remaining
                .store(remaining - 1, Ordering::SeqCst);
            return Err(ChainError::ConnectionFailed(
                "simulated node outage".to_string(),
            ));
        }

        Ok(BaseContracts {
            directory: "0x000000000000000000000000000000000000d17e".to_string(),
            agreements: "0x00000000000000000000000000000000000a97ee".to_string(),
        })
    }

    async fn verify_agreement_recorded(
        &self,
        agreement_id: &str,
        _counterparty_address: &str,
        _proposal_sig: &str,
        _contracts: &BaseContracts,
    ) -> Result<bool, ChainError> {
        if self.fail_verify.load(Ordering::SeqCst) {
            return Err(ChainError::Rpc("simulated rpc failure".to_string()));
        }

        self.verify_calls
            .write()
            .unwrap()
            .push(agreement_id.to_string());
        Ok(self.recorded.read().unwrap().contains(agreement_id))
    }

    async fn terminate_agreement(
        &self,
        _producer_policy: &Policy,
        _counterparty_address: &str,
        agreement_id: &str,
        reason: CancellationReason,
        _contracts: &BaseContracts,
    ) -> Result<(), ChainError> {
        self.terminate_calls
            .write()
            .unwrap()
            .push((agreement_id.to_string(), reason.code()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridbroker_types::PolicyHeader;

    fn test_policy() -> Policy {
        Policy {
            header: PolicyHeader {
                name: "producer".to_string(),
                version: "2.0".to_string(),
            },
            api_specs: vec![],
        }
    }

    #[tokio::test]
    async fn test_mock_recorded_set() {
        let chain = MockChainAdapter::new();
        let contracts = chain.init_contracts().await.unwrap();

        assert!(!chain
            .verify_agreement_recorded("ag-1", "0xA", "sig", &contracts)
            .await
            .unwrap());

        chain.set_recorded("ag-1");
        assert!(chain
            .verify_agreement_recorded("ag-1", "0xA", "sig", &contracts)
            .await
            .unwrap());

        chain.clear_recorded("ag-1");
        assert!(!chain
            .verify_agreement_recorded("ag-1", "0xA", "sig", &contracts)
            .await
            .unwrap());

        assert_eq!(chain.verify_count("ag-1"), 3);
    }

    #[tokio::test]
    async fn test_mock_init_failures_then_success() {
        let chain = MockChainAdapter::new();
        chain.fail_init_times(2);

        assert!(chain.init_contracts().await.is_err());
        assert!(chain.init_contracts().await.is_err());
        assert!(chain.init_contracts().await.is_ok());
        assert_eq!(chain.init_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_terminate_accounting() {
        let chain = MockChainAdapter::new();
        let contracts = chain.init_contracts().await.unwrap();
        let policy = test_policy();

        chain
            .terminate_agreement(
                &policy,
                "0xA",
                "ag-1",
                CancellationReason::ContainerFailure,
                &contracts,
            )
            .await
            .unwrap();

        assert_eq!(chain.terminate_count("ag-1"), 1);
        assert_eq!(chain.terminate_reasons("ag-1"), vec![103]);
        assert_eq!(chain.terminate_count("ag-2"), 0);
    }
}
