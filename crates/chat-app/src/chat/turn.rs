use std::sync::Arc;
use std::time::Duration;

use gemchat_llm::{
    AvailabilityProbe, LlmProvider, ProviderError, ProviderMessage, Role as ProviderRole,
    StreamRequest, StreamTarget,
};
use snafu::{ResultExt, Snafu};
use tokio::time::Instant;

use super::history::{History, HistoryError};
use super::ingest::{IngestEnd, IngestLimits, IngestReport, ingest_stream, truncate_for_log};
use super::message::{Message, Role};
use super::session::Session;
use crate::render::{NoticeLevel, Renderer, StatusState};

pub const DEFAULT_STREAM_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_CHUNK_LOG_INTERVAL: usize = 10;
pub const DEFAULT_MAX_LOG_LENGTH: usize = 50;

pub const GENERATING_LABEL: &str = "Generating response...";
pub const COMPLETE_LABEL: &str = "Response complete!";
pub const TIMEOUT_LABEL: &str = "Timeout occurred!";
pub const STREAM_ERROR_LABEL: &str = "Error processing stream";
pub const NO_RESPONSE_TEXT: &str = "No response received from the model. Please try again.";

/// Lifecycle of one user turn. Every turn starts and ends in `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnState {
    #[default]
    Idle,
    Validating,
    Streaming,
    Committed,
    Rejected,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnTransition {
    Admit,
    Validated,
    Reject,
    Commit,
    Fail,
    ResetToIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TurnTransitionRejection {
    pub from: TurnState,
    pub transition: TurnTransition,
}

impl TurnState {
    pub fn apply(self, transition: TurnTransition) -> Result<Self, TurnTransitionRejection> {
        match (self, transition) {
            (Self::Idle, TurnTransition::Admit) => Ok(Self::Validating),
            (Self::Validating, TurnTransition::Validated) => Ok(Self::Streaming),
            (Self::Validating, TurnTransition::Reject) => Ok(Self::Rejected),
            (Self::Validating, TurnTransition::Fail) => Ok(Self::Failed),
            (Self::Streaming, TurnTransition::Commit) => Ok(Self::Committed),
            (Self::Streaming, TurnTransition::Fail) => Ok(Self::Failed),
            (
                Self::Idle | Self::Committed | Self::Rejected | Self::Failed,
                TurnTransition::ResetToIdle,
            ) => Ok(Self::Idle),
            (from, transition) => Err(TurnTransitionRejection { from, transition }),
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Rejected | Self::Failed)
    }
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum TurnError {
    #[snafu(display(
        "Ollama is not running or not reachable, so model '{model_id}' cannot be used. \
         Please start Ollama and try again."
    ))]
    ServerUnreachable {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display(
        "Ollama model '{model_id}' is not available. \
         Please install it with `ollama pull {model_id}`."
    ))]
    ModelUnavailable {
        stage: &'static str,
        model_id: String,
    },
    #[snafu(display(
        "response stream timed out after {elapsed_ms} ms with {content_len} bytes received"
    ))]
    StreamTimeout {
        stage: &'static str,
        elapsed_ms: u64,
        content_len: usize,
    },
    #[snafu(display("turn deadline of {timeout_ms} ms passed on `{stage}`"))]
    TurnTimeout {
        stage: &'static str,
        timeout_ms: u64,
    },
    #[snafu(display("Error processing stream: {message}"))]
    StreamFailed {
        stage: &'static str,
        message: String,
    },
    #[snafu(display("Error generating response: {source}"))]
    StreamOpen {
        stage: &'static str,
        source: ProviderError,
    },
    #[snafu(display("{NO_RESPONSE_TEXT}"))]
    EmptyResponse { stage: &'static str },
    #[snafu(display("history update failed on `{stage}`: {source}"))]
    HistoryUpdate {
        stage: &'static str,
        source: HistoryError,
    },
}

/// What one call to [`TurnPipeline::run_turn`] did to the history.
#[derive(Debug)]
pub enum TurnOutcome {
    /// Blank input; nothing was admitted.
    Ignored,
    /// User and assistant messages were appended. `truncated_by` explains a
    /// partial reply.
    Committed {
        content: String,
        truncated_by: Option<TurnError>,
    },
    /// Refused before streaming; the user message was rolled back.
    Rejected(TurnError),
    /// Streaming produced nothing usable; the user message was rolled back.
    Failed(TurnError),
}

impl TurnOutcome {
    pub fn final_state(&self) -> Option<TurnState> {
        match self {
            Self::Ignored => None,
            Self::Committed { .. } => Some(TurnState::Committed),
            Self::Rejected(_) => Some(TurnState::Rejected),
            Self::Failed(_) => Some(TurnState::Failed),
        }
    }

    pub fn error(&self) -> Option<&TurnError> {
        match self {
            Self::Ignored => None,
            Self::Committed { truncated_by, .. } => truncated_by.as_ref(),
            Self::Rejected(error) | Self::Failed(error) => Some(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnConfig {
    pub model_id: String,
    pub stream_timeout: Duration,
    pub turn_timeout: Duration,
    pub chunk_log_interval: usize,
    pub max_log_length: usize,
}

impl TurnConfig {
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            stream_timeout: DEFAULT_STREAM_TIMEOUT,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            chunk_log_interval: DEFAULT_CHUNK_LOG_INTERVAL,
            max_log_length: DEFAULT_MAX_LOG_LENGTH,
        }
    }

    pub fn with_stream_timeout(mut self, timeout: Duration) -> Self {
        self.stream_timeout = timeout;
        self
    }

    pub fn with_turn_timeout(mut self, timeout: Duration) -> Self {
        self.turn_timeout = timeout;
        self
    }

    pub fn with_log_limits(mut self, chunk_log_interval: usize, max_log_length: usize) -> Self {
        self.chunk_log_interval = chunk_log_interval;
        self.max_log_length = max_log_length;
        self
    }
}

/// Runs user turns against one provider: admit, validate, stream, then commit
/// or roll back.
///
/// On every exit path the history either gained exactly one user and one
/// assistant message or is back to its pre-turn contents.
pub struct TurnPipeline {
    provider: Arc<dyn LlmProvider>,
    probe: Arc<dyn AvailabilityProbe>,
    config: TurnConfig,
    state: TurnState,
}

impl TurnPipeline {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        probe: Arc<dyn AvailabilityProbe>,
        config: TurnConfig,
    ) -> Self {
        Self {
            provider,
            probe,
            config,
            state: TurnState::Idle,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    pub fn provider(&self) -> &Arc<dyn LlmProvider> {
        &self.provider
    }

    pub async fn run_turn(
        &mut self,
        session: &mut Session,
        input: &str,
        renderer: &mut dyn Renderer,
    ) -> TurnOutcome {
        if input.trim().is_empty() {
            tracing::debug!("ignoring blank user input");
            return TurnOutcome::Ignored;
        }

        let target = session.next_turn_target();
        let started = Instant::now();
        let turn_deadline = started + self.config.turn_timeout;
        let baseline = session.history().len();

        tracing::info!(
            target = ?target,
            input = %truncate_for_log(input, self.config.max_log_length),
            "turn started"
        );

        self.advance(TurnTransition::Admit);
        if let Err(source) = session.history_mut().append(Message::user(input)) {
            let error = TurnError::HistoryUpdate {
                stage: "admit-user-message",
                source,
            };
            renderer.render_notice(NoticeLevel::Error, &error.to_string());
            self.advance(TurnTransition::Reject);
            self.advance(TurnTransition::ResetToIdle);
            return TurnOutcome::Rejected(error);
        }
        renderer.render_message(Role::User, input);

        if let Err(error) = self.validate(turn_deadline).await {
            if matches!(error, TurnError::TurnTimeout { .. }) {
                tracing::error!(
                    target = ?target,
                    error = %error,
                    "turn timed out during validation"
                );
                renderer.render_status(TIMEOUT_LABEL, StatusState::Error);
                renderer.render_notice(NoticeLevel::Warning, NO_RESPONSE_TEXT);
                Self::rollback(session.history_mut(), baseline);
                self.advance(TurnTransition::Fail);
                self.advance(TurnTransition::ResetToIdle);
                return TurnOutcome::Failed(error);
            }

            tracing::error!(target = ?target, error = %error, "turn rejected before streaming");
            renderer.render_notice(NoticeLevel::Error, &error.to_string());
            Self::rollback(session.history_mut(), baseline);
            self.advance(TurnTransition::Reject);
            self.advance(TurnTransition::ResetToIdle);
            return TurnOutcome::Rejected(error);
        }

        self.advance(TurnTransition::Validated);
        renderer.render_status(GENERATING_LABEL, StatusState::Running);

        let outcome = match self
            .stream_reply(session.history(), target, turn_deadline)
            .await
        {
            Ok(report) => self.settle(session.history_mut(), baseline, report, renderer),
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    error = %error,
                    "failed to start response stream"
                );
                renderer.render_status(STREAM_ERROR_LABEL, StatusState::Error);
                renderer.render_notice(NoticeLevel::Error, &error.to_string());
                Self::rollback(session.history_mut(), baseline);
                self.advance(TurnTransition::Fail);
                TurnOutcome::Failed(error)
            }
        };

        self.advance(TurnTransition::ResetToIdle);
        tracing::info!(
            target = ?target,
            outcome = ?outcome.final_state(),
            history_len = session.history().len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "turn finished"
        );

        outcome
    }

    async fn validate(&self, turn_deadline: Instant) -> Result<(), TurnError> {
        let model_id = self.config.model_id.as_str();

        let model_present = tokio::time::timeout_at(turn_deadline, self.probe.probe_model(model_id))
            .await
            .map_err(|_| self.turn_timeout("validate-model"))?;
        if model_present {
            return Ok(());
        }

        let server_reachable = tokio::time::timeout_at(turn_deadline, self.probe.probe_server())
            .await
            .map_err(|_| self.turn_timeout("validate-server"))?;
        if server_reachable {
            ModelUnavailableSnafu {
                stage: "validate-model",
                model_id,
            }
            .fail()
        } else {
            ServerUnreachableSnafu {
                stage: "validate-server",
                model_id,
            }
            .fail()
        }
    }

    fn turn_timeout(&self, stage: &'static str) -> TurnError {
        TurnError::TurnTimeout {
            stage,
            timeout_ms: self.config.turn_timeout.as_millis() as u64,
        }
    }

    async fn stream_reply(
        &self,
        history: &History,
        target: StreamTarget,
        turn_deadline: Instant,
    ) -> Result<IngestReport, TurnError> {
        let request = StreamRequest::new(
            target,
            self.config.model_id.clone(),
            build_provider_messages(history),
        );

        let handle = self
            .provider
            .stream_chat(request)
            .context(StreamOpenSnafu {
                stage: "open-stream",
            })?;

        // Detached; the cancel signal below stops the worker without aborting
        // a read that is already in flight.
        let _worker = tokio::spawn(handle.worker);
        let mut stream = handle.stream;

        let report = ingest_stream(
            &mut stream,
            IngestLimits {
                stream_timeout: self.config.stream_timeout,
                turn_deadline,
                chunk_log_interval: self.config.chunk_log_interval,
                max_log_length: self.config.max_log_length,
            },
        )
        .await;

        if stream.cancel() {
            tracing::debug!(target = ?target, "signalled provider worker to stop");
        }

        Ok(report)
    }

    fn settle(
        &mut self,
        history: &mut History,
        baseline: usize,
        report: IngestReport,
        renderer: &mut dyn Renderer,
    ) -> TurnOutcome {
        let truncated_by = match &report.end {
            IngestEnd::Completed => {
                renderer.render_status(COMPLETE_LABEL, StatusState::Complete);
                None
            }
            IngestEnd::StreamTimeout | IngestEnd::TurnTimeout => {
                renderer.render_status(TIMEOUT_LABEL, StatusState::Error);
                Some(TurnError::StreamTimeout {
                    stage: "ingest-stream",
                    elapsed_ms: report.elapsed.as_millis() as u64,
                    content_len: report.content.len(),
                })
            }
            IngestEnd::Failed(message) => {
                let error = TurnError::StreamFailed {
                    stage: "ingest-stream",
                    message: message.clone(),
                };
                renderer.render_status(STREAM_ERROR_LABEL, StatusState::Error);
                renderer.render_notice(NoticeLevel::Error, &error.to_string());
                Some(error)
            }
        };

        if !report.has_content() {
            tracing::warn!(events = report.events, "no response content received from model");
            renderer.render_notice(NoticeLevel::Warning, NO_RESPONSE_TEXT);
            Self::rollback(history, baseline);
            self.advance(TurnTransition::Fail);
            return TurnOutcome::Failed(
                truncated_by.unwrap_or(TurnError::EmptyResponse {
                    stage: "commit-response",
                }),
            );
        }

        let content = report.content;
        if let Err(source) = history.append(Message::assistant(content.clone())) {
            let error = TurnError::HistoryUpdate {
                stage: "commit-assistant-message",
                source,
            };
            renderer.render_notice(NoticeLevel::Error, &error.to_string());
            Self::rollback(history, baseline);
            self.advance(TurnTransition::Fail);
            return TurnOutcome::Failed(error);
        }

        renderer.render_message(Role::Assistant, &content);
        tracing::info!(
            content_len = content.len(),
            truncated = truncated_by.is_some(),
            "response saved to history"
        );
        self.advance(TurnTransition::Commit);

        TurnOutcome::Committed {
            content,
            truncated_by,
        }
    }

    /// Pops back to `baseline`; only ever removes what this turn appended.
    fn rollback(history: &mut History, baseline: usize) {
        while history.len() > baseline {
            match history.pop_last() {
                Ok(message) => {
                    tracing::info!(role = message.role.as_str(), "rolled back message");
                }
                Err(error) => {
                    tracing::error!(error = %error, "rollback stopped early");
                    break;
                }
            }
        }
    }

    fn advance(&mut self, transition: TurnTransition) {
        match self.state.apply(transition) {
            Ok(next) => {
                tracing::debug!(from = ?self.state, to = ?next, "turn state changed");
                self.state = next;
            }
            Err(rejection) => {
                tracing::error!(?rejection, "illegal turn state transition");
            }
        }
    }
}

/// The whole history goes to the model, system message included.
fn build_provider_messages(history: &History) -> Vec<ProviderMessage> {
    history
        .snapshot()
        .iter()
        .map(|message| {
            ProviderMessage::new(
                chat_role_to_provider(message.role),
                message.content.clone(),
            )
        })
        .collect()
}

fn chat_role_to_provider(role: Role) -> ProviderRole {
    match role {
        Role::System => ProviderRole::System,
        Role::User => ProviderRole::User,
        Role::Assistant => ProviderRole::Assistant,
    }
}
