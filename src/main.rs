mod cli;
mod search_client;

use std::io;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use dotenv::dotenv;
use eyre::Result;
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use crate::cli::chat::ChatContext;
use crate::cli::chat::session::UuidIdentity;
use crate::search_client::SearchClient;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Query to send instead of starting an interactive session
    #[arg(short, long)]
    input: Option<String>,

    /// Base URL of the search service
    #[arg(long, env = "SEARCH_API_URL", global = true)]
    api_url: Option<String>,

    /// Request timeout in seconds
    #[arg(long, default_value_t = 30, global = true)]
    timeout: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a search conversation
    Chat {
        /// Query to send instead of starting an interactive session
        #[arg(short, long)]
        input: Option<String>,

        /// Enable verbose logging
        #[arg(short, long)]
        verbose: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv().ok();

    let cli = Cli::parse();

    let (input, verbose) = match cli.command {
        Some(Commands::Chat { input, verbose }) => (input, verbose),
        None => (cli.input, cli.verbose),
    };

    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Starting search assistant");

    let search_client = match SearchClient::new(
        cli.api_url.as_deref().unwrap_or_default(),
        Duration::from_secs(cli.timeout),
    ) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Failed to initialize search client: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };
    info!("Using search endpoint {}", search_client.endpoint());

    let interactive = input.is_none();
    let mut chat_context = ChatContext::new(
        Box::new(io::stdout()),
        input,
        interactive,
        Arc::new(search_client),
        Box::new(UuidIdentity),
    );
    chat_context.run().await
}
