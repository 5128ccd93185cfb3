use std::sync::Arc;

use gemchat_llm::{
    AvailabilityProbe, AvailabilitySnapshot, LlmProvider, ProviderError, fetch_models_for_provider,
};
use snafu::Snafu;

use crate::chat::{Session, TurnOutcome, TurnPipeline};
use crate::render::{NoticeLevel, Renderer};
use crate::settings::Settings;
use crate::telemetry::TelemetryError;

pub const SUBTITLE: &str = "Streaming Chat Interface";
const MODELS_COMMAND: &str = "/models";
const STATUS_COMMAND: &str = "/status";

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AppError {
    #[snafu(display("failed to initialize logging on `{stage}`: {source}"))]
    Telemetry {
        stage: &'static str,
        source: TelemetryError,
    },
    #[snafu(display("failed to create provider on `{stage}`: {source}"))]
    CreateProvider {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to create availability probe on `{stage}`: {source}"))]
    CreateProbe {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("failed to open terminal on `{stage}`: {source}"))]
    Terminal {
        stage: &'static str,
        source: rustyline::error::ReadlineError,
    },
}

/// Counts reported when the input loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub committed: usize,
    pub rejected: usize,
    pub failed: usize,
}

/// Interactive loop around one session: banner, status, then turns until the
/// renderer stops yielding input.
pub struct ChatApp<R: Renderer> {
    settings: Settings,
    session: Session,
    pipeline: TurnPipeline,
    probe: Arc<dyn AvailabilityProbe>,
    renderer: R,
}

impl<R: Renderer> ChatApp<R> {
    pub fn new(
        settings: Settings,
        provider: Arc<dyn LlmProvider>,
        probe: Arc<dyn AvailabilityProbe>,
        renderer: R,
    ) -> Self {
        let session = Session::new(settings.system_message.clone());
        let pipeline = TurnPipeline::new(provider, Arc::clone(&probe), settings.to_turn_config());

        Self {
            settings,
            session,
            pipeline,
            probe,
            renderer,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub async fn run(&mut self) -> RunSummary {
        tracing::info!(
            model = %self.settings.model,
            base_url = %self.settings.base_url,
            "chat app starting"
        );

        self.renderer.render_banner(
            &self.settings.title,
            &format!("{SUBTITLE} ({} via Ollama)", self.settings.model),
        );
        self.refresh_status().await;

        for message in self.session.history().snapshot() {
            self.renderer.render_message(message.role, &message.content);
        }

        let mut summary = RunSummary::default();
        while let Some(input) = self.renderer.read_user_input() {
            match input.trim() {
                MODELS_COMMAND => self.list_models().await,
                STATUS_COMMAND => {
                    self.refresh_status().await;
                }
                _ => {
                    let outcome = self
                        .pipeline
                        .run_turn(&mut self.session, &input, &mut self.renderer)
                        .await;
                    match outcome {
                        TurnOutcome::Ignored => {}
                        TurnOutcome::Committed { .. } => summary.committed += 1,
                        TurnOutcome::Rejected(_) => summary.rejected += 1,
                        TurnOutcome::Failed(_) => summary.failed += 1,
                    }
                }
            }
        }

        tracing::info!(
            committed = summary.committed,
            rejected = summary.rejected,
            failed = summary.failed,
            "input closed, leaving chat loop"
        );
        summary
    }

    async fn refresh_status(&mut self) -> AvailabilitySnapshot {
        let model_id = self.settings.model.as_str();
        let snapshot = self.probe.snapshot(model_id).await;
        tracing::info!(
            server_reachable = snapshot.server_reachable,
            model_present = snapshot.model_present,
            "checked system status"
        );

        self.renderer.render_sidebar_status(
            snapshot.server_reachable,
            snapshot.model_present,
            model_id,
        );
        if !snapshot.server_reachable {
            self.renderer.render_notice(
                NoticeLevel::Warning,
                &format!(
                    "Ollama is not reachable at {}. Start it with `ollama serve`.",
                    self.settings.base_url
                ),
            );
        } else if !snapshot.model_present {
            self.renderer.render_notice(
                NoticeLevel::Warning,
                &format!("Model {model_id} is missing. Install it with `ollama pull {model_id}`."),
            );
        }

        snapshot
    }

    async fn list_models(&mut self) {
        match fetch_models_for_provider(self.pipeline.provider().as_ref()).await {
            Ok(catalog) if catalog.is_empty() => {
                self.renderer
                    .render_notice(NoticeLevel::Info, "No models are installed.");
            }
            Ok(catalog) => {
                let text = catalog
                    .names()
                    .into_iter()
                    .map(|name| {
                        let marker = if name == self.settings.model { "*" } else { " " };
                        format!("{marker} {name}")
                    })
                    .collect::<Vec<_>>()
                    .join("\n");
                self.renderer.render_notice(NoticeLevel::Info, &text);
            }
            Err(error) => {
                tracing::error!(error = %error, "failed to list models");
                self.renderer.render_notice(
                    NoticeLevel::Error,
                    &format!("Failed to list models: {error}"),
                );
            }
        }
    }
}
