//! Scripted provider, probe and renderer doubles for the turn pipeline tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use gemchat_llm::{
    AvailabilityProbe, BoxFuture, DEFAULT_OLLAMA_MODEL, LlmProvider, Model, ModelCatalog,
    ProviderError, ProviderEventStream, ProviderResult, ProviderStreamHandle, ProviderWorker,
    StreamEventMapped, StreamEventPayload, StreamRequest, StreamTarget, make_event_stream,
};
use tokio::sync::{mpsc, oneshot};

use crate::chat::Role;
use crate::render::{NoticeLevel, Renderer, StatusState};

/// One step of a scripted provider stream.
#[derive(Debug, Clone)]
pub(crate) enum ScriptStep {
    Fragment(String),
    Reasoning(String),
    Wait(Duration),
    Error(String),
    Done,
    /// Ends the stream without a terminal event.
    Close,
}

impl ScriptStep {
    pub(crate) fn fragment(text: &str) -> Self {
        Self::Fragment(text.to_string())
    }

    pub(crate) fn wait_secs(secs: u64) -> Self {
        Self::Wait(Duration::from_secs(secs))
    }
}

fn scripted_worker(
    target: StreamTarget,
    steps: Vec<ScriptStep>,
    event_tx: mpsc::UnboundedSender<StreamEventMapped>,
    mut cancel_rx: oneshot::Receiver<()>,
) -> ProviderWorker {
    Box::pin(async move {
        for step in steps {
            let payload = match step {
                ScriptStep::Fragment(text) => StreamEventPayload::Delta(text),
                ScriptStep::Reasoning(text) => StreamEventPayload::ReasoningDelta(text),
                ScriptStep::Wait(duration) => {
                    tokio::select! {
                        _ = &mut cancel_rx => return,
                        _ = tokio::time::sleep(duration) => continue,
                    }
                }
                ScriptStep::Error(message) => StreamEventPayload::Error(message),
                ScriptStep::Done => StreamEventPayload::Done,
                ScriptStep::Close => return,
            };

            let terminal = matches!(
                payload,
                StreamEventPayload::Done | StreamEventPayload::Error(_)
            );
            if event_tx
                .send(StreamEventMapped::new(target, payload))
                .is_err()
                || terminal
            {
                return;
            }
        }
    })
}

/// Spawns a worker that plays `steps` into a fresh stream.
pub(crate) fn scripted_stream(target: StreamTarget, steps: Vec<ScriptStep>) -> ProviderEventStream {
    let (event_tx, stream, cancel_rx) = make_event_stream(target);
    tokio::spawn(scripted_worker(target, steps, event_tx, cancel_rx));
    stream
}

/// Provider that answers every request with the same script.
pub(crate) struct ScriptedProvider {
    steps: Vec<ScriptStep>,
    fail_open: bool,
    models: Option<Vec<&'static str>>,
    requests: Mutex<Vec<StreamRequest>>,
}

impl ScriptedProvider {
    pub(crate) fn new(steps: Vec<ScriptStep>) -> Self {
        Self {
            steps,
            fail_open: false,
            models: Some(vec![DEFAULT_OLLAMA_MODEL]),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn failing_to_open() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new())
        }
    }

    pub(crate) fn with_models(mut self, models: Option<Vec<&'static str>>) -> Self {
        self.models = models;
        self
    }

    pub(crate) fn requests(&self) -> Vec<StreamRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl LlmProvider for ScriptedProvider {
    fn id(&self) -> &str {
        "scripted"
    }

    fn name(&self) -> &str {
        "Scripted"
    }

    fn default_model(&self) -> &str {
        DEFAULT_OLLAMA_MODEL
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        Box::pin(async move {
            match &self.models {
                Some(names) => Ok(ModelCatalog::new(
                    names.iter().map(|name| Model::new(*name)).collect(),
                )),
                None => Err(ProviderError::ServerReported {
                    stage: "scripted-fetch-models",
                    message: "catalog unavailable".to_string(),
                }),
            }
        })
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        let target = request.target;
        self.requests.lock().expect("requests lock").push(request);

        if self.fail_open {
            return Err(ProviderError::ServerReported {
                stage: "scripted-open",
                message: "refused to open stream".to_string(),
            });
        }

        let (event_tx, stream, cancel_rx) = make_event_stream(target);
        Ok(ProviderStreamHandle {
            stream,
            worker: scripted_worker(target, self.steps.clone(), event_tx, cancel_rx),
        })
    }
}

/// Availability probe with fixed answers. Clones share call counters.
#[derive(Debug, Clone)]
pub(crate) struct FakeProbe {
    server: bool,
    model: bool,
    delay: Option<Duration>,
    server_checks: Arc<AtomicUsize>,
    model_listings: Arc<AtomicUsize>,
}

impl FakeProbe {
    fn new(server: bool, model: bool) -> Self {
        Self {
            server,
            model,
            delay: None,
            server_checks: Arc::new(AtomicUsize::new(0)),
            model_listings: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn available() -> Self {
        Self::new(true, true)
    }

    pub(crate) fn model_missing() -> Self {
        Self::new(true, false)
    }

    pub(crate) fn unreachable() -> Self {
        Self::new(false, false)
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn server_checks(&self) -> usize {
        self.server_checks.load(Ordering::SeqCst)
    }

    pub(crate) fn model_listings(&self) -> usize {
        self.model_listings.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
    }
}

impl AvailabilityProbe for FakeProbe {
    fn probe_server<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.pause().await;
            self.server_checks.fetch_add(1, Ordering::SeqCst);
            self.server
        })
    }

    fn probe_model<'a>(&'a self, _model_id: &'a str) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.pause().await;
            self.server_checks.fetch_add(1, Ordering::SeqCst);
            if !self.server {
                return false;
            }
            self.model_listings.fetch_add(1, Ordering::SeqCst);
            self.model
        })
    }
}

/// Records every render call and replays queued input lines.
#[derive(Debug, Default)]
pub(crate) struct RecordingRenderer {
    pub inputs: VecDeque<String>,
    pub banners: Vec<(String, String)>,
    pub messages: Vec<(Role, String)>,
    pub statuses: Vec<(String, StatusState)>,
    pub notices: Vec<(NoticeLevel, String)>,
    pub sidebar: Vec<(bool, bool, String)>,
}

impl RecordingRenderer {
    pub(crate) fn with_inputs<'a>(inputs: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            inputs: inputs.into_iter().map(str::to_string).collect(),
            ..Self::default()
        }
    }
}

impl Renderer for RecordingRenderer {
    fn render_banner(&mut self, title: &str, subtitle: &str) {
        self.banners.push((title.to_string(), subtitle.to_string()));
    }

    fn render_message(&mut self, role: Role, content: &str) {
        self.messages.push((role, content.to_string()));
    }

    fn render_status(&mut self, label: &str, state: StatusState) {
        self.statuses.push((label.to_string(), state));
    }

    fn render_notice(&mut self, level: NoticeLevel, text: &str) {
        self.notices.push((level, text.to_string()));
    }

    fn render_sidebar_status(
        &mut self,
        server_reachable: bool,
        model_present: bool,
        model_id: &str,
    ) {
        self.sidebar
            .push((server_reachable, model_present, model_id.to_string()));
    }

    fn read_user_input(&mut self) -> Option<String> {
        self.inputs.pop_front()
    }
}
