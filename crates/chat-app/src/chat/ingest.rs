use std::time::Duration;

use gemchat_llm::{ProviderEventStream, StreamEventPayload};
use tokio::time::Instant;

/// Limits applied while draining one provider stream.
#[derive(Debug, Clone, Copy)]
pub struct IngestLimits {
    /// Measured from the moment ingestion starts; checked once per received event.
    pub stream_timeout: Duration,
    /// Absolute end of the whole turn; also bounds each wait for the next event.
    pub turn_deadline: Instant,
    pub chunk_log_interval: usize,
    pub max_log_length: usize,
}

/// Why ingestion stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestEnd {
    Completed,
    StreamTimeout,
    TurnTimeout,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub content: String,
    pub events: usize,
    pub elapsed: Duration,
    pub end: IngestEnd,
}

impl IngestReport {
    /// Whitespace-only output counts as no output.
    pub fn has_content(&self) -> bool {
        !self.content.trim().is_empty()
    }

    pub fn timed_out(&self) -> bool {
        matches!(self.end, IngestEnd::StreamTimeout | IngestEnd::TurnTimeout)
    }
}

/// Drains `stream` into a response buffer.
///
/// The stream deadline is cooperative: it is only checked when an event arrives,
/// and an event that arrives late is discarded. The turn deadline additionally
/// cuts short a wait that would outlive the turn.
pub async fn ingest_stream(stream: &mut ProviderEventStream, limits: IngestLimits) -> IngestReport {
    let started = Instant::now();
    let target = stream.target();
    let mut content = String::new();
    let mut events = 0_usize;

    tracing::info!(target = ?target, "starting to process stream");

    let end = loop {
        let next = match tokio::time::timeout_at(limits.turn_deadline, stream.recv()).await {
            Ok(next) => next,
            Err(_) => {
                tracing::error!(
                    target = ?target,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "turn deadline passed while waiting for the next chunk"
                );
                break IngestEnd::TurnTimeout;
            }
        };

        let Some(event) = next else {
            tracing::debug!(target = ?target, "provider stream exhausted");
            break IngestEnd::Completed;
        };

        if event.target != target {
            tracing::debug!(
                expected = ?target,
                received = ?event.target,
                "dropping stale stream event"
            );
            continue;
        }

        events += 1;

        let now = Instant::now();
        if now.duration_since(started) > limits.stream_timeout {
            tracing::error!(
                target = ?target,
                timeout_secs = limits.stream_timeout.as_secs_f64(),
                "stream processing timed out"
            );
            break IngestEnd::StreamTimeout;
        }
        if now > limits.turn_deadline {
            tracing::error!(target = ?target, "turn deadline passed during stream processing");
            break IngestEnd::TurnTimeout;
        }

        match event.payload {
            StreamEventPayload::Delta(fragment) => {
                tracing::debug!(
                    fragment = %truncate_for_log(&fragment, limits.max_log_length),
                    "added response content"
                );
                content.push_str(&fragment);
            }
            StreamEventPayload::ReasoningDelta(reasoning) => {
                tracing::debug!(
                    reasoning = %truncate_for_log(&reasoning, limits.max_log_length),
                    "skipping reasoning content"
                );
            }
            StreamEventPayload::Done => break IngestEnd::Completed,
            StreamEventPayload::Error(message) => {
                tracing::error!(target = ?target, error = %message, "error in stream processing");
                break IngestEnd::Failed(message);
            }
        }

        if limits.chunk_log_interval > 0 && events % limits.chunk_log_interval == 0 {
            tracing::info!(events, "processed chunks so far");
        }
    };

    let elapsed = started.elapsed();
    tracing::info!(
        target = ?target,
        events,
        content_len = content.len(),
        elapsed_ms = elapsed.as_millis() as u64,
        "finished processing stream"
    );

    IngestReport {
        content,
        events,
        elapsed,
        end,
    }
}

/// Cuts `text` to at most `max_chars` characters for log output.
pub fn truncate_for_log(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((index, _)) => &text[..index],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ScriptStep, scripted_stream};
    use gemchat_llm::{StreamEventMapped, StreamTarget, make_event_stream};

    fn limits(stream_secs: u64, turn_secs: u64) -> IngestLimits {
        IngestLimits {
            stream_timeout: Duration::from_secs(stream_secs),
            turn_deadline: Instant::now() + Duration::from_secs(turn_secs),
            chunk_log_interval: 10,
            max_log_length: 50,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn concatenates_fragments_in_arrival_order() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![
                ScriptStep::fragment("Hi"),
                ScriptStep::wait_secs(1),
                ScriptStep::fragment(" there"),
                ScriptStep::fragment("!"),
                ScriptStep::Done,
            ],
        );

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "Hi there!");
        assert_eq!(report.end, IngestEnd::Completed);
        assert_eq!(report.events, 4);
        assert!(report.has_content());
    }

    #[tokio::test(start_paused = true)]
    async fn late_event_is_discarded_after_stream_timeout() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![
                ScriptStep::fragment("a"),
                ScriptStep::wait_secs(10),
                ScriptStep::fragment("b"),
                ScriptStep::wait_secs(10),
                ScriptStep::fragment("c"),
                ScriptStep::wait_secs(15),
                ScriptStep::fragment("d"),
                ScriptStep::Done,
            ],
        );

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "abc");
        assert_eq!(report.end, IngestEnd::StreamTimeout);
        assert!(report.timed_out());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_stream_is_cut_at_the_turn_deadline() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![
                ScriptStep::fragment("partial"),
                ScriptStep::wait_secs(600),
                ScriptStep::fragment(" never"),
            ],
        );

        let report = ingest_stream(&mut stream, limits(300, 20)).await;

        assert_eq!(report.content, "partial");
        assert_eq!(report.end, IngestEnd::TurnTimeout);
        assert!(report.elapsed >= Duration::from_secs(20));
    }

    #[tokio::test(start_paused = true)]
    async fn error_event_keeps_accumulated_content() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![
                ScriptStep::fragment("half"),
                ScriptStep::Error("connection reset".to_string()),
            ],
        );

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "half");
        assert_eq!(report.end, IngestEnd::Failed("connection reset".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_without_done_still_completes() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![ScriptStep::fragment("x"), ScriptStep::Close],
        );

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "x");
        assert_eq!(report.end, IngestEnd::Completed);
    }

    #[tokio::test(start_paused = true)]
    async fn whitespace_only_output_is_not_content() {
        let mut stream = scripted_stream(
            StreamTarget::new(1),
            vec![ScriptStep::fragment("  \n"), ScriptStep::Done],
        );

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "  \n");
        assert!(!report.has_content());
    }

    #[tokio::test]
    async fn events_for_another_target_are_ignored() {
        let (event_tx, mut stream, _cancel_rx) = make_event_stream(StreamTarget::new(2));
        for (target, payload) in [
            (1, StreamEventPayload::Delta("stale".to_string())),
            (2, StreamEventPayload::Delta("fresh".to_string())),
            (1, StreamEventPayload::Done),
            (2, StreamEventPayload::Done),
        ] {
            event_tx
                .send(StreamEventMapped::new(StreamTarget::new(target), payload))
                .expect("receiver alive");
        }

        let report = ingest_stream(&mut stream, limits(30, 60)).await;

        assert_eq!(report.content, "fresh");
        assert_eq!(report.events, 2);
    }

    #[test]
    fn log_truncation_respects_char_boundaries() {
        assert_eq!(truncate_for_log("héllo wörld", 4), "héll");
        assert_eq!(truncate_for_log("short", 50), "short");
        assert_eq!(truncate_for_log("", 3), "");
    }
}
