use std::time::Duration;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, ensure};
use tokio::sync::{mpsc, oneshot};

use super::model::{DEFAULT_OLLAMA_MODEL, ModelCatalog, TAGS_PATH};
use super::provider::{
    BoxFuture, BuildClientSnafu, EmptyMessageSetSnafu, LlmProvider, PayloadParseSnafu,
    ProviderConfig, ProviderError, ProviderMessage, ProviderResult, ProviderStreamHandle,
    ProviderWorker, ReadBodySnafu, SendRequestSnafu, StreamEventMapped, StreamEventPayload,
    StreamRequest, StreamTarget, UnexpectedStatusSnafu, join_endpoint, make_event_stream,
};

pub const OLLAMA_PROVIDER_ID: &str = "ollama";
const CHAT_PATH: &str = "/api/chat";

pub struct OllamaProviderAdapter {
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OllamaProviderAdapter {
    pub fn new(config: ProviderConfig) -> ProviderResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .context(BuildClientSnafu {
                stage: "ollama-adapter-new",
            })?;

        Ok(Self { config, client })
    }

    fn open_stream_request(
        client: &reqwest::Client,
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> reqwest::RequestBuilder {
        let body = ChatRequest {
            model: &request.model_id,
            messages: &request.messages,
            stream: true,
        };
        client.post(config.endpoint(CHAT_PATH)).json(&body)
    }

    async fn open_stream(
        client: &reqwest::Client,
        config: &ProviderConfig,
        request: &StreamRequest,
    ) -> ProviderResult<reqwest::Response> {
        let url = config.endpoint(CHAT_PATH);
        let response = Self::open_stream_request(client, config, request)
            .send()
            .await
            .context(SendRequestSnafu {
                stage: "open-stream",
                url,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.context(ReadBodySnafu {
                stage: "read-open-stream-error",
            })?;
            return UnexpectedStatusSnafu {
                stage: "open-stream-status",
                status: status.as_u16(),
                body,
            }
            .fail();
        }

        Ok(response)
    }

    fn emit_error_event(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        error: ProviderError,
    ) {
        let _ = event_tx.send(StreamEventMapped::new(
            target,
            StreamEventPayload::Error(error.to_string()),
        ));
    }

    /// Maps one decoded chunk to the events it carries, in the order a reader expects them.
    fn map_chunk(target: StreamTarget, chunk: ChatChunk) -> Vec<StreamEventMapped> {
        let mut events = Vec::new();

        if let Some(message) = chunk.error {
            events.push(StreamEventMapped::new(
                target,
                StreamEventPayload::Error(
                    ProviderError::ServerReported {
                        stage: "stream-chunk",
                        message,
                    }
                    .to_string(),
                ),
            ));
            return events;
        }

        if let Some(message) = chunk.message {
            if let Some(thinking) = message.thinking.filter(|text| !text.is_empty()) {
                events.push(StreamEventMapped::new(
                    target,
                    StreamEventPayload::ReasoningDelta(thinking),
                ));
            }
            if let Some(content) = message.content.filter(|text| !text.is_empty()) {
                events.push(StreamEventMapped::new(
                    target,
                    StreamEventPayload::Delta(content),
                ));
            }
        }

        if chunk.done {
            events.push(StreamEventMapped::new(target, StreamEventPayload::Done));
        }

        events
    }

    /// Forwards events and reports whether the stream reached a terminal event
    /// or the consumer went away.
    fn forward(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        events: Vec<StreamEventMapped>,
    ) -> bool {
        for event in events {
            let terminal = event.is_terminal();
            if event_tx.send(event).is_err() || terminal {
                return true;
            }
        }
        false
    }

    fn forward_decoded(
        event_tx: &mpsc::UnboundedSender<StreamEventMapped>,
        target: StreamTarget,
        decoded: Vec<Result<ChatChunk, serde_json::Error>>,
    ) -> bool {
        for chunk in decoded {
            match chunk {
                Ok(chunk) => {
                    if Self::forward(event_tx, Self::map_chunk(target, chunk)) {
                        return true;
                    }
                }
                Err(source) => {
                    tracing::warn!(
                        target = ?target,
                        error = %source,
                        "failed to decode stream chunk"
                    );
                    Self::emit_error_event(
                        event_tx,
                        target,
                        ProviderError::PayloadParse {
                            stage: "decode-stream-chunk",
                            source,
                        },
                    );
                    return true;
                }
            }
        }
        false
    }

    async fn run_stream_worker(
        client: reqwest::Client,
        config: ProviderConfig,
        request: StreamRequest,
        event_tx: mpsc::UnboundedSender<StreamEventMapped>,
        mut cancel_rx: oneshot::Receiver<()>,
    ) {
        let target = request.target;
        let response = tokio::select! {
            _ = &mut cancel_rx => {
                tracing::debug!(target = ?target, "stream cancelled before the server answered");
                return;
            }
            response = Self::open_stream(&client, &config, &request) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(error) => {
                tracing::error!(
                    target = ?target,
                    model_id = %request.model_id,
                    error = %error,
                    "failed to open chat stream"
                );
                Self::emit_error_event(&event_tx, target, error);
                return;
            }
        };

        let mut body = response.bytes_stream();
        let mut decoder = NdjsonDecoder::default();

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    // Dropping the body closes the connection on our side.
                    tracing::debug!(target = ?target, "chat stream cancelled");
                    return;
                }
                next_bytes = body.next() => {
                    match next_bytes {
                        Some(Ok(bytes)) => {
                            if Self::forward_decoded(&event_tx, target, decoder.push(&bytes)) {
                                return;
                            }
                        }
                        Some(Err(source)) => {
                            tracing::warn!(
                                target = ?target,
                                error = %source,
                                "chat stream body failed"
                            );
                            Self::emit_error_event(
                                &event_tx,
                                target,
                                ProviderError::ReadBody {
                                    stage: "stream-body",
                                    source,
                                },
                            );
                            return;
                        }
                        None => break,
                    }
                }
            }
        }

        let trailing = decoder.finish().into_iter().collect();
        if Self::forward_decoded(&event_tx, target, trailing) {
            return;
        }

        // Body ended without `done: true`; exhaustion still ends the stream.
        let _ = event_tx.send(StreamEventMapped::new(target, StreamEventPayload::Done));
    }
}

impl LlmProvider for OllamaProviderAdapter {
    fn id(&self) -> &str {
        &self.config.provider_id
    }

    fn name(&self) -> &str {
        "Ollama"
    }

    fn default_model(&self) -> &str {
        self.config
            .default_model
            .as_deref()
            .unwrap_or(DEFAULT_OLLAMA_MODEL)
    }

    fn fetch_models<'a>(&'a self) -> BoxFuture<'a, ProviderResult<ModelCatalog>> {
        Box::pin(fetch_catalog(&self.client, &self.config.base_url, None))
    }

    fn stream_chat(&self, request: StreamRequest) -> ProviderResult<ProviderStreamHandle> {
        ensure!(
            !request.messages.is_empty(),
            EmptyMessageSetSnafu {
                stage: "stream-chat",
                target: request.target,
            }
        );

        let (event_tx, stream, cancel_rx) = make_event_stream(request.target);
        let worker: ProviderWorker = Box::pin(Self::run_stream_worker(
            self.client.clone(),
            self.config.clone(),
            request,
            event_tx,
            cancel_rx,
        ));

        Ok(ProviderStreamHandle { stream, worker })
    }
}

/// Fetches and parses `GET /api/tags`, optionally bounded by `timeout`.
pub(crate) async fn fetch_catalog(
    client: &reqwest::Client,
    base_url: &str,
    timeout: Option<Duration>,
) -> ProviderResult<ModelCatalog> {
    let url = join_endpoint(base_url, TAGS_PATH);
    let mut request = client.get(&url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.context(SendRequestSnafu {
        stage: "send-tags-request",
        url,
    })?;
    let status = response.status();
    let payload = response.bytes().await.context(ReadBodySnafu {
        stage: "read-tags-response",
    })?;

    if !status.is_success() {
        return UnexpectedStatusSnafu {
            stage: "tags-http-status",
            status: status.as_u16(),
            body: String::from_utf8_lossy(&payload).into_owned(),
        }
        .fail();
    }

    ModelCatalog::from_tags_payload(&payload).context(PayloadParseSnafu {
        stage: "parse-tags-response",
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ProviderMessage],
    stream: bool,
}

#[derive(Debug, Default, Deserialize)]
pub(crate) struct ChatChunk {
    #[serde(default)]
    message: Option<ChunkMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    thinking: Option<String>,
}

/// Splits a byte stream into newline-delimited JSON chunks.
///
/// Network reads can end anywhere, including inside a multi-byte character, so
/// bytes are buffered until a full line is available.
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    pending: Vec<u8>,
}

impl NdjsonDecoder {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<Result<ChatChunk, serde_json::Error>> {
        self.pending.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(newline) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline).collect::<Vec<_>>();
            if let Some(chunk) = Self::decode_line(&line) {
                chunks.push(chunk);
            }
        }
        chunks
    }

    pub(crate) fn finish(&mut self) -> Option<Result<ChatChunk, serde_json::Error>> {
        let line = std::mem::take(&mut self.pending);
        Self::decode_line(&line)
    }

    fn decode_line(line: &[u8]) -> Option<Result<ChatChunk, serde_json::Error>> {
        let line = line.trim_ascii();
        if line.is_empty() {
            return None;
        }
        Some(serde_json::from_slice(line))
    }
}
