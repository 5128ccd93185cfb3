use std::time::Instant;

use gemchat_llm::StreamTarget;

use super::history::History;

/// One chat session: the owner of the history for the lifetime of the process.
#[derive(Debug)]
pub struct Session {
    history: History,
    started_at: Instant,
    next_turn: u64,
}

impl Session {
    pub fn new(system_message: impl Into<String>) -> Self {
        let history = History::new(system_message);
        tracing::info!("initialized session with system message");

        Self {
            history,
            started_at: Instant::now(),
            next_turn: 1,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Reserves a fresh stream target; never reused within a session.
    pub fn next_turn_target(&mut self) -> StreamTarget {
        let target = StreamTarget::new(self.next_turn);
        self.next_turn = self.next_turn.saturating_add(1);
        target
    }

    pub fn turns_started(&self) -> u64 {
        self.next_turn - 1
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::info!(
            messages = self.history.len(),
            turns = self.turns_started(),
            uptime_secs = self.started_at.elapsed().as_secs(),
            "session closed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turn_targets_are_unique_and_increasing() {
        let mut session = Session::new("sys");

        let first = session.next_turn_target();
        let second = session.next_turn_target();

        assert!(first < second);
        assert_eq!(session.turns_started(), 2);
        assert_eq!(session.history().len(), 1);
    }
}
