use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Runtime configuration for one containerized service of a workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Image reference the runtime launches.
    pub image: String,

    /// Entry command override, empty to use the image default.
    #[serde(default)]
    pub command: Vec<String>,

    /// KEY=VALUE pairs injected into the container.
    #[serde(default)]
    pub environment: Vec<String>,

    /// Host bind mounts.
    #[serde(default)]
    pub binds: Vec<String>,
}

impl ServiceConfig {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            image: image.into(),
            command: Vec::new(),
            environment: Vec::new(),
            binds: Vec::new(),
        }
    }
}

/// A workload deployment: service name to its configuration. Ordered so that
/// serialized deployments are deterministic.
pub type Deployment = BTreeMap<String, ServiceConfig>;
