use async_trait::async_trait;
use gridbroker_types::Deployment;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use thiserror::Error;

use crate::{AgreementFilter, EstablishedAgreement, ExchangeDevice};

// ═══════════════════════════════════════════════════════════════════════════
// ERROR TYPES
// ═══════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("agreement not found: {0}")]
    NotFound(String),

    #[error("duplicate agreement id: {0}")]
    DuplicateId(String),

    #[error("agreement already archived: {0}")]
    Archived(String),

    #[error("database error: {0}")]
    DatabaseError(String),

    #[error("serialization error: {0}")]
    SerializationError(String),
}

/// Result of the terminate transition.
pub struct TerminateOutcome {
    /// The record after the transition.
    pub record: EstablishedAgreement,

    /// True when this call performed the transition. Concurrent callers race
    /// on a compare-and-set of `terminated_time`; exactly one observes true.
    pub newly_terminated: bool,
}

// ═══════════════════════════════════════════════════════════════════════════
// STORE TRAIT
// ═══════════════════════════════════════════════════════════════════════════

/// The agent's persistent store. It exclusively owns record storage; every
/// returned record is a snapshot, never a live view. Per-agreement updates
/// are linearizable by key.
#[async_trait]
pub trait AgreementStore: Send + Sync {
    /// Persist a new agreement record. At most one non-archived record may
    /// exist per agreement id.
    async fn save_agreement(&self, record: &EstablishedAgreement) -> Result<(), StoreError>;

    /// Snapshot the record for `(agreement_id, protocol)`, if present.
    async fn get_agreement(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<Option<EstablishedAgreement>, StoreError>;

    /// Scan records of one protocol, keeping those every filter accepts.
    async fn find_agreements(
        &self,
        protocol: &str,
        filters: &[AgreementFilter],
    ) -> Result<Vec<EstablishedAgreement>, StoreError>;

    /// Record that containers for the agreement are running now.
    async fn execution_started(
        &self,
        agreement_id: &str,
        protocol: &str,
        deployment: &Deployment,
    ) -> Result<EstablishedAgreement, StoreError>;

    /// Record that the agreement was verified on chain.
    async fn finalized(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<EstablishedAgreement, StoreError>;

    /// Begin cancellation: compare-and-set `terminated_time`. Repeated and
    /// concurrent calls all succeed; only the first mutates the record, and
    /// only that caller sees `newly_terminated == true`.
    async fn terminated(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<TerminateOutcome, StoreError>;

    /// Terminal step: freeze the record. Idempotent.
    async fn archive(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<EstablishedAgreement, StoreError>;

    /// The persisted exchange registration, if the device has registered.
    async fn exchange_device(&self) -> Result<Option<ExchangeDevice>, StoreError>;

    /// Persist the exchange registration.
    async fn save_exchange_device(&self, device: &ExchangeDevice) -> Result<(), StoreError>;
}

// ═══════════════════════════════════════════════════════════════════════════
// IN-MEMORY STORE
// ═══════════════════════════════════════════════════════════════════════════

/// In-memory store backend. The lock is held only across the individual
/// operation, which gives the per-key linearizability the governance loops
/// rely on.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    agreements: Arc<RwLock<HashMap<String, EstablishedAgreement>>>,
    device: Arc<RwLock<Option<ExchangeDevice>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            agreements: Arc::new(RwLock::new(HashMap::new())),
            device: Arc::new(RwLock::new(None)),
        }
    }

    pub fn len(&self) -> usize {
        self.agreements.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.agreements.read().unwrap().is_empty()
    }

    fn with_record<T>(
        &self,
        agreement_id: &str,
        protocol: &str,
        apply: impl FnOnce(&mut EstablishedAgreement) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut agreements = self
            .agreements
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let record = agreements
            .get_mut(agreement_id)
            .filter(|r| r.agreement_protocol == protocol)
            .ok_or_else(|| StoreError::NotFound(agreement_id.to_string()))?;

        apply(record)
    }
}

fn current_timestamp() -> u64 {
    chrono::Utc::now().timestamp() as u64
}

#[async_trait]
impl AgreementStore for InMemoryStore {
    async fn save_agreement(&self, record: &EstablishedAgreement) -> Result<(), StoreError> {
        let mut agreements = self
            .agreements
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        if let Some(existing) = agreements.get(&record.agreement_id) {
            if !existing.archived {
                return Err(StoreError::DuplicateId(record.agreement_id.clone()));
            }
        }
        agreements.insert(record.agreement_id.clone(), record.clone());
        Ok(())
    }

    async fn get_agreement(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<Option<EstablishedAgreement>, StoreError> {
        let agreements = self
            .agreements
            .read()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        Ok(agreements
            .get(agreement_id)
            .filter(|r| r.agreement_protocol == protocol)
            .cloned())
    }

    async fn find_agreements(
        &self,
        protocol: &str,
        filters: &[AgreementFilter],
    ) -> Result<Vec<EstablishedAgreement>, StoreError> {
        let agreements = self
            .agreements
            .read()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;

        let mut results: Vec<_> = agreements
            .values()
            .filter(|r| r.agreement_protocol == protocol)
            .filter(|r| filters.iter().all(|f| f(r)))
            .cloned()
            .collect();

        results.sort_by(|a, b| {
            a.creation_time
                .cmp(&b.creation_time)
                .then_with(|| a.agreement_id.cmp(&b.agreement_id))
        });
        Ok(results)
    }

    async fn execution_started(
        &self,
        agreement_id: &str,
        protocol: &str,
        deployment: &Deployment,
    ) -> Result<EstablishedAgreement, StoreError> {
        self.with_record(agreement_id, protocol, |record| {
            if record.archived {
                return Err(StoreError::Archived(agreement_id.to_string()));
            }
            record.execution_start_time = current_timestamp();
            record.current_deployment = deployment.clone();
            Ok(record.clone())
        })
    }

    async fn finalized(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<EstablishedAgreement, StoreError> {
        self.with_record(agreement_id, protocol, |record| {
            if record.archived {
                return Err(StoreError::Archived(agreement_id.to_string()));
            }
            record.finalized_time = current_timestamp();
            Ok(record.clone())
        })
    }

    async fn terminated(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<TerminateOutcome, StoreError> {
        self.with_record(agreement_id, protocol, |record| {
            if record.archived || record.terminated_time != 0 {
                return Ok(TerminateOutcome {
                    record: record.clone(),
                    newly_terminated: false,
                });
            }
            record.terminated_time = current_timestamp();
            Ok(TerminateOutcome {
                record: record.clone(),
                newly_terminated: true,
            })
        })
    }

    async fn archive(
        &self,
        agreement_id: &str,
        protocol: &str,
    ) -> Result<EstablishedAgreement, StoreError> {
        self.with_record(agreement_id, protocol, |record| {
            record.archived = true;
            Ok(record.clone())
        })
    }

    async fn exchange_device(&self) -> Result<Option<ExchangeDevice>, StoreError> {
        let device = self
            .device
            .read()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        Ok(device.clone())
    }

    async fn save_exchange_device(&self, device: &ExchangeDevice) -> Result<(), StoreError> {
        let mut slot = self
            .device
            .write()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        *slot = Some(device.clone());
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// TESTS
// ═══════════════════════════════════════════════════════════════════════════
