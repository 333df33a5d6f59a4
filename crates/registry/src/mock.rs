use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use crate::{AgreementRegistry, PutAgreementState, RegistryError};

/// One recorded `put_agreement_state` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutCall {
    pub device_id: String,
    pub token: String,
    pub agreement_id: String,
    pub microservice: String,
    pub state: String,
}

/// In-memory registry for tests: records every call and serves reads back.
#[derive(Default)]
pub struct MockRegistry {
    states: Arc<RwLock<HashMap<String, PutAgreementState>>>,
    puts: Arc<RwLock<Vec<PutCall>>>,
    deletes: Arc<RwLock<Vec<String>>>,
    failing: AtomicBool,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with a permanent error.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// The state last written for an agreement, the registry-side GET.
    pub fn agreement_state(&self, agreement_id: &str) -> Option<PutAgreementState> {
        self.states.read().unwrap().get(agreement_id).cloned()
    }

    pub fn put_calls(&self) -> Vec<PutCall> {
        self.puts.read().unwrap().clone()
    }

    pub fn delete_count(&self, agreement_id: &str) -> usize {
        self.deletes
            .read()
            .unwrap()
            .iter()
            .filter(|id| id.as_str() == agreement_id)
            .count()
    }

    fn check_failing(&self) -> Result<(), RegistryError> {
        if self.failing.load(Ordering::SeqCst) {
            Err(RegistryError::Rejected {
                status: 401,
                body: "injected failure".to_string(),
            })
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl AgreementRegistry for MockRegistry {
    async fn put_agreement_state(
        &self,
        device_id: &str,
        token: &str,
        agreement_id: &str,
        microservice: &str,
        state: &str,
    ) -> Result<(), RegistryError> {
        self.check_failing()?;

        let body = PutAgreementState {
            microservice: microservice.to_string(),
            state: state.to_string(),
        };
        self.states
            .write()
            .unwrap()
            .insert(agreement_id.to_string(), body);
        self.puts.write().unwrap().push(PutCall {
            device_id: device_id.to_string(),
            token: token.to_string(),
            agreement_id: agreement_id.to_string(),
            microservice: microservice.to_string(),
            state: state.to_string(),
        });
        Ok(())
    }

    async fn delete_agreement(
        &self,
        _device_id: &str,
        _token: &str,
        agreement_id: &str,
    ) -> Result<(), RegistryError> {
        self.check_failing()?;

        // absent records still delete cleanly, like a remote 404
        self.states.write().unwrap().remove(agreement_id);
        self.deletes
            .write()
            .unwrap()
            .push(agreement_id.to_string());
        Ok(())
    }
}
