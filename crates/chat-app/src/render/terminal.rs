use colored::Colorize;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;

use super::{NoticeLevel, Renderer, StatusState};
use crate::chat::Role;

pub const INPUT_PROMPT: &str = ">> ";
const HELP_TEXT: &str = "Type a message and press enter. '/models' lists installed models, \
                         '/status' re-checks Ollama, '/quit' exits.";

/// Line-oriented renderer backed by rustyline for input and ANSI colors for output.
pub struct TerminalRenderer {
    editor: DefaultEditor,
    prompt: String,
}

impl TerminalRenderer {
    pub fn new() -> rustyline::Result<Self> {
        Ok(Self {
            editor: DefaultEditor::new()?,
            prompt: INPUT_PROMPT.to_string(),
        })
    }
}

/// Terminal text for one history message, or `None` when nothing is printed.
///
/// The system prompt is configuration, not conversation. User lines are
/// already on screen from the readline prompt.
fn styled_message(role: Role, content: &str) -> Option<String> {
    match role {
        Role::System | Role::User => None,
        Role::Assistant => Some(
            content
                .lines()
                .map(|line| line.bright_blue().to_string())
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }
}

impl Renderer for TerminalRenderer {
    fn render_banner(&mut self, title: &str, subtitle: &str) {
        println!("{}", format!("=== {title} ===").bright_magenta().bold());
        println!("{}", subtitle.bright_black());
        println!("{}", HELP_TEXT.bright_black());
        println!();
    }

    fn render_message(&mut self, role: Role, content: &str) {
        if let Some(text) = styled_message(role, content) {
            println!("{text}\n");
        }
    }

    fn render_status(&mut self, label: &str, state: StatusState) {
        let line = match state {
            StatusState::Running => format!("[..] {label}").yellow(),
            StatusState::Complete => format!("[ok] {label}").bright_green(),
            StatusState::Error => format!("[!!] {label}").red(),
        };
        println!("{line}");
    }

    fn render_notice(&mut self, level: NoticeLevel, text: &str) {
        match level {
            NoticeLevel::Info => println!("{}", text.bright_black()),
            NoticeLevel::Warning => println!("{}", text.yellow()),
            NoticeLevel::Error => eprintln!("{}", text.red()),
        }
    }

    fn render_sidebar_status(
        &mut self,
        server_reachable: bool,
        model_present: bool,
        model_id: &str,
    ) {
        println!("{}", "System Status".bold());
        if server_reachable {
            println!("{}", "  [ok] Ollama is running".bright_green());
        } else {
            println!("{}", "  [x] Ollama is not running".red());
        }
        if model_present {
            println!("{}", format!("  [ok] Model {model_id} is available").bright_green());
        } else {
            println!("{}", format!("  [x] Model {model_id} is not available").red());
        }
        println!();
    }

    fn read_user_input(&mut self) -> Option<String> {
        loop {
            match self.editor.readline(&self.prompt) {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == "/quit" || trimmed == "/exit" {
                        println!("{}", "Goodbye!".bright_green());
                        return None;
                    }
                    if !trimmed.is_empty() {
                        let _ = self.editor.add_history_entry(trimmed);
                    }
                    return Some(line);
                }
                Err(ReadlineError::Interrupted) => {
                    println!("{}", "CTRL-C detected. Type '/quit' to exit.".yellow());
                }
                Err(ReadlineError::Eof) => {
                    println!("{}", "CTRL-D detected. Exiting...".bright_green());
                    return None;
                }
                Err(error) => {
                    tracing::error!(error = %error, "failed to read user input");
                    eprintln!("{}", format!("Error: {error}").red());
                    return None;
                }
            }
        }
    }
}
