#![deny(unsafe_code)]

/// Terminal chat front-end for a local Ollama server.
///
/// `main.rs` wires these modules together; everything below is usable (and
/// tested) without a terminal or a running server.
pub mod app;
/// Conversation history and the per-turn pipeline.
pub mod chat;
/// Renderer contract and its terminal implementation.
pub mod render;
/// Settings loading from defaults, file and environment.
pub mod settings;
pub mod telemetry;

#[cfg(test)]
mod test_support;
