use std::time::Duration;

use snafu::ResultExt;

use super::model::TAGS_PATH;
use super::ollama_adapter::fetch_catalog;
use super::provider::{BoxFuture, BuildClientSnafu, ProviderResult, join_endpoint};

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Server reachability and model presence, as observed by one pair of probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AvailabilitySnapshot {
    pub server_reachable: bool,
    pub model_present: bool,
}

/// Read-only availability checks against the inference server.
///
/// Probes never fail: every transport, status or parsing problem is logged and
/// reported as `false`.
pub trait AvailabilityProbe: Send + Sync {
    fn probe_server<'a>(&'a self) -> BoxFuture<'a, bool>;

    /// Must return `false` without listing models when the server is unreachable.
    fn probe_model<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, bool>;

    fn snapshot<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, AvailabilitySnapshot> {
        Box::pin(async move {
            let server_reachable = self.probe_server().await;
            let model_present = server_reachable && self.probe_model(model_id).await;
            AvailabilitySnapshot {
                server_reachable,
                model_present,
            }
        })
    }
}

pub struct OllamaProber {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl OllamaProber {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(timeout)
            .build()
            .context(BuildClientSnafu {
                stage: "ollama-prober-new",
            })?;

        Ok(Self {
            client,
            base_url: base_url.into().trim().to_string(),
            timeout,
        })
    }

    async fn check_server(&self) -> bool {
        let url = join_endpoint(&self.base_url, TAGS_PATH);
        tracing::info!(url = %url, "checking if the inference server is running");

        match self.client.get(&url).timeout(self.timeout).send().await {
            Ok(response) if response.status().is_success() => {
                tracing::info!("inference server is running");
                true
            }
            Ok(response) => {
                tracing::error!(
                    status = response.status().as_u16(),
                    "inference server returned a non-success status"
                );
                false
            }
            Err(error) if error.is_connect() => {
                tracing::error!(
                    error = %error,
                    "inference server is not running or not accessible"
                );
                false
            }
            Err(error) if error.is_timeout() => {
                tracing::error!(
                    timeout_ms = self.timeout.as_millis() as u64,
                    "inference server did not answer in time"
                );
                false
            }
            Err(error) => {
                tracing::error!(
                    error = %error,
                    "error checking if the inference server is running"
                );
                false
            }
        }
    }

    async fn check_model(&self, model_id: &str) -> bool {
        if !self.check_server().await {
            return false;
        }

        tracing::info!(model_id = %model_id, "checking if the model is available");
        match fetch_catalog(&self.client, &self.base_url, Some(self.timeout)).await {
            Ok(catalog) => {
                tracing::info!(available = ?catalog.names(), "available models");
                if catalog.contains(model_id) {
                    tracing::info!(model_id = %model_id, "model is available");
                    true
                } else {
                    tracing::warn!(model_id = %model_id, "model not found in available models");
                    false
                }
            }
            Err(error) => {
                tracing::error!(error = %error, "error checking model availability");
                false
            }
        }
    }
}

impl AvailabilityProbe for OllamaProber {
    fn probe_server<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(self.check_server())
    }

    fn probe_model<'a>(&'a self, model_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(self.check_model(model_id))
    }
}
