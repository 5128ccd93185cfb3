/// Conversation log with tail-only mutation.
pub mod history;
/// Draining a provider stream under deadlines.
pub mod ingest;
pub mod message;
pub mod session;
/// The per-turn state machine and pipeline.
pub mod turn;

pub use history::{History, HistoryError, HistoryResult};
pub use ingest::{IngestEnd, IngestLimits, IngestReport, ingest_stream, truncate_for_log};
pub use message::{Message, Role};
pub use session::Session;
pub use turn::{
    TurnConfig, TurnError, TurnOutcome, TurnPipeline, TurnState, TurnTransition,
    TurnTransitionRejection,
};
