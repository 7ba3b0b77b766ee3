use rustyline::{Config, Editor, Result};

use crate::cli::chat::conversation_state::Phase;

/// `? ` while the assistant is waiting on an answer, `> ` otherwise.
pub fn generate_prompt(phase: Phase) -> String {
    match phase {
        Phase::AwaitingAnswer => "? ".to_string(),
        _ => "> ".to_string(),
    }
}

pub fn rl() -> Result<Editor<()>> {
    let config = Config::builder()
        .history_ignore_space(true)
        .auto_add_history(false)
        .build();
    Editor::with_config(config)
}
