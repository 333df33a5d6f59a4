use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("registry rejected request: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),
}

/// Agreement-state body for `PUT /devices/<id>/agreements/<id>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PutAgreementState {
    pub microservice: String,
    pub state: String,
}

/// Producer-state service the agent reports agreements to.
#[async_trait]
pub trait AgreementRegistry: Send + Sync {
    /// Upsert the producer's view of an agreement. Retries transport
    /// failures internally and only returns permanent errors.
    async fn put_agreement_state(
        &self,
        device_id: &str,
        token: &str,
        agreement_id: &str,
        microservice: &str,
        state: &str,
    ) -> Result<(), RegistryError>;

    /// Remove the producer's record of an agreement. A record that is
    /// already gone counts as success.
    async fn delete_agreement(
        &self,
        device_id: &str,
        token: &str,
        agreement_id: &str,
    ) -> Result<(), RegistryError>;
}

/// Whether a response is done, retryable, or a hard failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Success,
    Retry,
    Fail,
}

fn classify_status(status: StatusCode) -> Disposition {
    if status.is_success() {
        Disposition::Success
    } else if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        Disposition::Retry
    } else {
        Disposition::Fail
    }
}

fn is_transient(error: &reqwest::Error) -> bool {
    error.is_connect() || error.is_timeout()
}

/// HTTP client for the exchange registry.
///
/// Transport-transient failures (connect, timeout, 5xx) are retried after a
/// fixed delay without bound; recovery from a wedged upstream is the
/// supervisor's restart. Everything else is permanent and returned.
pub struct ExchangeRegistry {
    base_url: String,
    client: reqwest::Client,
    retry_delay: Duration,
}

impl ExchangeRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            client: reqwest::Client::new(),
            retry_delay: Duration::from_secs(10),
        }
    }

    pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    fn agreement_url(&self, device_id: &str, agreement_id: &str) -> String {
        format!(
            "{}/devices/{}/agreements/{}",
            self.base_url.trim_end_matches('/'),
            device_id,
            agreement_id
        )
    }

    async fn send_with_retry(
        &self,
        agreement_id: &str,
        accept_not_found: bool,
        build: impl Fn() -> reqwest::RequestBuilder,
    ) -> Result<(), RegistryError> {
        loop {
            match build().send().await {
                Err(e) if is_transient(&e) => {
                    warn!(
                        agreement_id = %agreement_id,
                        error = %e,
                        "transient registry transport failure, retrying"
                    );
                    tokio::time::sleep(self.retry_delay).await;
                }
                Err(e) => return Err(RegistryError::Transport(e.to_string())),
                Ok(response) => {
                    let status = response.status();
                    if accept_not_found && status == StatusCode::NOT_FOUND {
                        debug!(agreement_id = %agreement_id, "registry record already gone");
                        return Ok(());
                    }
                    match classify_status(status) {
                        Disposition::Success => return Ok(()),
                        Disposition::Retry => {
                            warn!(
                                agreement_id = %agreement_id,
                                status = status.as_u16(),
                                "registry unavailable, retrying"
                            );
                            tokio::time::sleep(self.retry_delay).await;
                        }
                        Disposition::Fail => {
                            let body = response.text().await.unwrap_or_default();
                            return Err(RegistryError::Rejected {
                                status: status.as_u16(),
                                body,
                            });
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl AgreementRegistry for ExchangeRegistry {
    async fn put_agreement_state(
        &self,
        device_id: &str,
        token: &str,
        agreement_id: &str,
        microservice: &str,
        state: &str,
    ) -> Result<(), RegistryError> {
        let url = self.agreement_url(device_id, agreement_id);
        let body = PutAgreementState {
            microservice: microservice.to_string(),
            state: state.to_string(),
        };

        debug!(agreement_id = %agreement_id, state = %state, "setting agreement state");

        self.send_with_retry(agreement_id, false, || {
            self.client
                .put(&url)
                .basic_auth(device_id, Some(token))
                .json(&body)
        })
        .await?;

        debug!(agreement_id = %agreement_id, state = %state, "agreement state set");
        Ok(())
    }

    async fn delete_agreement(
        &self,
        device_id: &str,
        token: &str,
        agreement_id: &str,
    ) -> Result<(), RegistryError> {
        let url = self.agreement_url(device_id, agreement_id);

        debug!(agreement_id = %agreement_id, "deleting agreement from registry");

        self.send_with_retry(agreement_id, true, || {
            self.client.delete(&url).basic_auth(device_id, Some(token))
        })
        .await?;

        debug!(agreement_id = %agreement_id, "agreement deleted from registry");
        Ok(())
    }
}
