use snafu::{Snafu, ensure};

use super::message::{Message, Role};

#[derive(Debug, Snafu, PartialEq, Eq)]
#[snafu(visibility(pub(crate)))]
pub enum HistoryError {
    #[snafu(display("history has no removable message on `{stage}`"))]
    EmptyHistory { stage: &'static str },
    #[snafu(display("history already starts with a system message on `{stage}`"))]
    SystemMessageRejected { stage: &'static str },
}

pub type HistoryResult<T> = Result<T, HistoryError>;

/// Ordered conversation log whose first entry is the permanent system message.
///
/// Entries are only ever appended or removed from the tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct History {
    messages: Vec<Message>,
}

impl History {
    pub fn new(system_message: impl Into<String>) -> Self {
        Self {
            messages: vec![Message::system(system_message)],
        }
    }

    pub fn append(&mut self, message: Message) -> HistoryResult<()> {
        ensure!(
            message.role != Role::System,
            SystemMessageRejectedSnafu {
                stage: "history-append",
            }
        );

        self.messages.push(message);
        Ok(())
    }

    /// Removes the newest message. The leading system message is never removable.
    pub fn pop_last(&mut self) -> HistoryResult<Message> {
        ensure!(
            self.messages.len() > 1,
            EmptyHistorySnafu {
                stage: "history-pop-last",
            }
        );

        self.messages.pop().ok_or(HistoryError::EmptyHistory {
            stage: "history-pop-last",
        })
    }

    pub fn snapshot(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn system_message(&self) -> Option<&Message> {
        self.messages
            .first()
            .filter(|message| message.role == Role::System)
    }

    /// Messages after the system message, the part a user sees.
    pub fn conversation(&self) -> &[Message] {
        self.messages.get(1..).unwrap_or_default()
    }
}
