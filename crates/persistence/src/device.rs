use serde::{Deserialize, Serialize};

/// Persisted record of this device's registration with the exchange
/// registry. The governance worker seeds its device id and registry token
/// from it at startup; later token rotations arrive as events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExchangeDevice {
    pub id: String,
    pub token: String,
    pub registered_at: u64,
}

impl ExchangeDevice {
    pub fn new(id: impl Into<String>, token: impl Into<String>, registered_at: u64) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            registered_at,
        }
    }
}
