/// Terminal implementation of the renderer contract.
pub mod terminal;

pub use terminal::TerminalRenderer;

use crate::chat::Role;

/// Progress indicator shown while a reply is generated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusState {
    Running,
    Complete,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Everything the chat front-end needs from a UI.
///
/// The turn pipeline only calls into this trait; it never draws anything itself.
pub trait Renderer {
    fn render_banner(&mut self, title: &str, subtitle: &str);
    fn render_message(&mut self, role: Role, content: &str);
    fn render_status(&mut self, label: &str, state: StatusState);
    fn render_notice(&mut self, level: NoticeLevel, text: &str);
    fn render_sidebar_status(
        &mut self,
        server_reachable: bool,
        model_present: bool,
        model_id: &str,
    );
    /// Blocks until the user submits a line. `None` ends the session.
    fn read_user_input(&mut self) -> Option<String>;
}
