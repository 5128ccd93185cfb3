use std::sync::Arc;

use gemchat::app::{
    AppError, ChatApp, CreateProbeSnafu, CreateProviderSnafu, TelemetrySnafu, TerminalSnafu,
};
use gemchat::render::TerminalRenderer;
use gemchat::settings::{SettingsOrigin, SettingsStore};
use gemchat::telemetry::init_tracing;
use gemchat_llm::{OllamaProber, create_provider};
use snafu::ResultExt;

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), AppError> {
    let load = SettingsStore::load();
    let settings = load.settings;

    init_tracing(&settings).context(TelemetrySnafu {
        stage: "main-init-tracing",
    })?;

    match &load.origin {
        SettingsOrigin::File(path) => tracing::info!(path = ?path, "loaded settings"),
        SettingsOrigin::Defaults => tracing::info!("settings file not found, using defaults"),
    }
    if let Some(warning) = &load.warning {
        tracing::warn!("{warning}");
    }

    let provider = create_provider(settings.to_provider_config()).context(CreateProviderSnafu {
        stage: "main-create-provider",
    })?;
    let probe = OllamaProber::new(&settings.base_url, settings.probe_timeout()).context(
        CreateProbeSnafu {
            stage: "main-create-probe",
        },
    )?;
    let renderer = TerminalRenderer::new().context(TerminalSnafu {
        stage: "main-open-terminal",
    })?;

    let mut app = ChatApp::new(settings, provider, Arc::new(probe), renderer);
    let summary = app.run().await;
    tracing::info!(?summary, "application exiting");

    Ok(())
}
