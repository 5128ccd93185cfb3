use std::sync::Arc;

mod model;
mod ollama_adapter;
mod probe;
mod provider;
#[cfg(test)]
mod test_support;

pub use model::{DEFAULT_OLLAMA_BASE_URL, DEFAULT_OLLAMA_MODEL, Model, ModelCatalog, TAGS_PATH};
pub use ollama_adapter::{OLLAMA_PROVIDER_ID, OllamaProviderAdapter};
pub use probe::{AvailabilityProbe, AvailabilitySnapshot, DEFAULT_PROBE_TIMEOUT, OllamaProber};
pub use provider::{
    BoxFuture, LlmProvider, ProviderConfig, ProviderError, ProviderEventStream, ProviderMessage,
    ProviderResult, ProviderStreamHandle, ProviderWorker, Role, StreamEventMapped,
    StreamEventPayload, StreamRequest, StreamTarget, make_event_stream,
};

pub fn create_provider(mut config: ProviderConfig) -> ProviderResult<Arc<dyn LlmProvider>> {
    if config.provider_id.trim().is_empty() {
        config.provider_id = OLLAMA_PROVIDER_ID.to_string();
    }

    match config.provider_id.as_str() {
        "ollama" => Ok(Arc::new(OllamaProviderAdapter::new(config)?)),
        _ => Err(ProviderError::UnsupportedProvider {
            stage: "create-provider",
            provider_id: config.provider_id,
        }),
    }
}

pub async fn fetch_models_for_provider(provider: &dyn LlmProvider) -> ProviderResult<ModelCatalog> {
    provider.fetch_models().await
}
