use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use thiserror::Error;

/// Errors raised while hydrating negotiation documents.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("malformed proposal: {0}")]
    MalformedProposal(String),

    #[error("malformed policy: {0}")]
    MalformedPolicy(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// The proposal exchanged during negotiation, kept serialized in the
/// agreement record. The governance core only hydrates it to pull out the
/// embedded policies.
///
/// Marshalling is canonical: demarshal followed by marshal reproduces the
/// input byte for byte, which the on-chain signature check depends on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    /// Serialized terms-and-conditions policy both parties agreed to.
    pub ts_and_cs: String,

    /// Serialized producer-side policy, input to on-chain termination.
    pub producer_policy: String,

    /// On-chain address of the proposing consumer.
    pub address: String,
}

impl Proposal {
    pub fn demarshal(text: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(text).map_err(|e| DocumentError::MalformedProposal(e.to_string()))
    }

    pub fn marshal(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::Serialization(e.to_string()))
    }
}

/// A policy document. The governance core reads the declared service
/// specifications and hands the whole policy to the chain adapter; the policy
/// language itself is interpreted elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub header: PolicyHeader,

    /// Service specifications this policy covers, most specific first.
    #[serde(default)]
    pub api_specs: Vec<ApiSpec>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyHeader {
    pub name: String,
    pub version: String,
}

/// Reference to a service specification published in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiSpec {
    pub spec_ref: String,

    #[serde(default)]
    pub version: String,
}

impl Policy {
    pub fn demarshal(text: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(text).map_err(|e| DocumentError::MalformedPolicy(e.to_string()))
    }

    pub fn marshal(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::Serialization(e.to_string()))
    }

    /// The first declared service specification, if the policy names any.
    pub fn first_spec_ref(&self) -> Option<&str> {
        self.api_specs.first().map(|s| s.spec_ref.as_str())
    }
}

/// Shared view over the producer's local policy set. Owned by the top-level
/// agent; the governance core holds a borrowed handle.
#[derive(Default)]
pub struct PolicyManager {
    policies: RwLock<Vec<Policy>>,
}

impl PolicyManager {
    pub fn new() -> Self {
        Self {
            policies: RwLock::new(Vec::new()),
        }
    }

    pub fn add_policy(&self, policy: Policy) {
        if let Ok(mut policies) = self.policies.write() {
            policies.push(policy);
        }
    }

    pub fn find(&self, name: &str) -> Option<Policy> {
        self.policies
            .read()
            .ok()
            .and_then(|p| p.iter().find(|p| p.header.name == name).cloned())
    }

    pub fn count(&self) -> usize {
        self.policies.read().ok().map(|p| p.len()).unwrap_or(0)
    }
}
