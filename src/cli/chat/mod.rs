pub mod conversation_state;
pub mod prompt;
pub mod results_table;
pub mod session;
pub mod view;

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use conversation_state::{ConversationState, SubmitError};
use crossterm::cursor::MoveTo;
use crossterm::execute;
use crossterm::terminal::{Clear, ClearType};
use eyre::{Result, eyre};
use prompt::generate_prompt;
use rustyline::error::ReadlineError;
use session::IdentityGenerator;
use tracing::{debug, info};

use crate::search_client::SearchBackend;

const WELCOME_TEXT: &str = "
Hi, I'm your search assistant. Tell me what you're looking for.

I may ask a few questions before recommending anything.

/new          Start a new conversation
/help         Show the help dialogue
/quit         Quit the application
";

const HELP_TEXT: &str = "
Search Assistant

/new          Start a new conversation (alias: /clear)
/help         Show this help dialogue
/quit         Quit the application

Ctrl-C while searching starts a new conversation.
";

pub struct ChatContext {
    output: Box<dyn Write>,
    input: Option<String>,
    interactive: bool,
    conversation_state: ConversationState,
    search_client: Arc<dyn SearchBackend>,
}

impl ChatContext {
    pub fn new(
        output: Box<dyn Write>,
        input: Option<String>,
        interactive: bool,
        search_client: Arc<dyn SearchBackend>,
        identity: Box<dyn IdentityGenerator>,
    ) -> Self {
        Self {
            output,
            input,
            interactive,
            conversation_state: ConversationState::new(identity),
            search_client,
        }
    }

    pub async fn run(&mut self) -> Result<ExitCode> {
        // Single query mode
        if let Some(input) = self.input.take() {
            self.handle_input(&input).await?;
            let failed = self.conversation_state.snapshot().last_error.is_some();
            return Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS });
        }

        if self.interactive {
            self.print_welcome()?;
            self.run_interactive().await?;
        }

        Ok(ExitCode::SUCCESS)
    }

    fn print_welcome(&mut self) -> Result<()> {
        writeln!(self.output, "{}", WELCOME_TEXT)?;
        Ok(())
    }

    async fn run_interactive(&mut self) -> Result<()> {
        let mut rl = prompt::rl()?;

        loop {
            let prompt_text = generate_prompt(self.conversation_state.phase());
            // A failed search leaves its text behind for another try.
            let initial = self.conversation_state.input().to_string();
            let readline = rl.readline_with_initial(&prompt_text, (&initial, ""));

            match readline {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }

                    rl.add_history_entry(line.as_str());

                    if line.trim() == "/quit" {
                        break;
                    }

                    if let Err(e) = self.handle_input(&line).await {
                        writeln!(self.output, "Error: {}", e)?;
                    }
                }
                Err(ReadlineError::Interrupted) => {
                    self.conversation_state.set_input("");
                    continue;
                }
                Err(ReadlineError::Eof) => break,
                Err(e) => {
                    writeln!(self.output, "Error: {}", e)?;
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_input(&mut self, input: &str) -> Result<()> {
        match input.trim() {
            "/help" => {
                writeln!(self.output, "{}", HELP_TEXT)?;
            }
            "/new" | "/clear" => {
                self.start_new_conversation()?;
            }
            _ => {
                self.process_query(input).await?;
            }
        }

        Ok(())
    }

    async fn process_query(&mut self, query: &str) -> Result<()> {
        let request = match self.conversation_state.submit(query) {
            Ok(request) => request,
            Err(SubmitError::BlankQuery) => return Ok(()),
            Err(e) => {
                writeln!(self.output, "{}", e)?;
                return Ok(());
            }
        };

        view::render_pending(&mut *self.output, &self.conversation_state.snapshot())?;

        let backend = Arc::clone(&self.search_client);
        let (text, session) = (request.query.clone(), request.session.clone());
        let mut search = tokio::spawn(async move { backend.search(&text, &session).await });

        let joined = if self.interactive {
            tokio::select! {
                joined = &mut search => joined,
                _ = tokio::signal::ctrl_c() => {
                    // The request is not cancelled; its answer is dropped
                    // once it arrives because the session has moved on.
                    self.start_new_conversation()?;
                    search.await
                }
            }
        } else {
            search.await
        };
        let result = joined.map_err(|e| eyre!("Search task failed: {}", e))?;

        let applied = match result {
            Ok(response) => self.conversation_state.on_success(&request, response),
            Err(error) => self.conversation_state.on_failure(&request, &error),
        };

        if applied {
            view::render(&mut *self.output, &self.conversation_state.snapshot())?;
        } else {
            debug!("Ignored response for an abandoned conversation");
        }

        Ok(())
    }

    fn start_new_conversation(&mut self) -> Result<()> {
        self.conversation_state.reset();
        info!("Started new conversation");

        if self.interactive {
            execute!(self.output, Clear(ClearType::All), MoveTo(0, 0))?;
        }
        writeln!(self.output, "Started a new conversation.")?;
        Ok(())
    }
}
