use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tracing::info;

use chat_stream_client::ledger::{JsonFileStore, StreamLedger};
use chat_stream_client::models::{ListWindow, ReasoningEffort};
use chat_stream_client::service::{Bootstrapper, ComposeRequest, ComposeService, Services};
use chat_stream_client::state::{SessionEvent, SharedSessionStore};
use chat_stream_client::stream::StreamOutcome;
use chat_stream_client::ClientConfig;

#[derive(Parser)]
#[command(name = "chat-stream-client", about = "Talk to the chat backend from a terminal")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the most recent chats.
    Chats,
    /// Reattach to the streams that were running when the client last stopped.
    Resume,
    /// Send a message and stream the reply.
    Send {
        /// Existing chat to continue; a new chat is created when omitted.
        #[arg(long)]
        chat: Option<String>,
        /// Model name; defaults to the chat's last model, then the first free model.
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        search: bool,
        #[arg(long)]
        memories: bool,
        #[arg(long, value_parser = parse_effort)]
        reasoning: Option<ReasoningEffort>,
        message: String,
    },
}

fn parse_effort(raw: &str) -> Result<ReasoningEffort, String> {
    match raw.to_ascii_lowercase().as_str() {
        "high" => Ok(ReasoningEffort::High),
        "medium" => Ok(ReasoningEffort::Medium),
        "low" => Ok(ReasoningEffort::Low),
        other => Err(format!("unknown reasoning effort '{other}'")),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (development convenience)
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chat_stream_client=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = ClientConfig::from_env()?;

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let store = JsonFileStore::open(&config.ledger_path)
        .with_context(|| format!("opening ledger {}", config.ledger_path.display()))?;
    let ledger = StreamLedger::new(Arc::new(store));
    let services = Services::from_config(&config, ledger)?;
    info!("Using backend {}", config.backend_uri);

    match cli.command {
        Command::Chats => {
            let chats = services.api.list_chats(ListWindow::first(config.page_size)).await?;
            for chat in chats {
                let name = chat.name.as_deref().unwrap_or("(untitled)");
                println!("{}  {name}", chat.id);
            }
        }
        Command::Resume => {
            let printer = spawn_printer(services.session.clone(), None);
            let bootstrapper = Bootstrapper::new(services.clone());
            let handles = bootstrapper.run(ListWindow::first(config.page_size)).await?;
            if handles.is_empty() {
                println!("No interrupted streams.");
            }
            for handle in handles {
                let stream_id = handle.stream_id().to_string();
                let outcome = handle.join().await;
                eprintln!("\nstream {stream_id}: {outcome:?}");
            }
            printer.abort();
        }
        Command::Send { chat, model, search, memories, reasoning, message } => {
            let catalog = services.ensure_models().await?;
            let model_name = match (model, chat.as_deref()) {
                (Some(name), _) => Some(name),
                (None, Some(chat_id)) => services.ledger.last_model(chat_id)?,
                (None, None) => None,
            };
            let model = match model_name {
                Some(name) => catalog
                    .find_by_name(&name)
                    .with_context(|| format!("unknown model '{name}'"))?,
                None => catalog.free.first().context("backend offers no free model")?,
            };

            let compose = ComposeService::new(services.clone());
            let request = ComposeRequest {
                message,
                reasoning,
                use_search: search,
                use_memories: memories,
            };
            let printer = spawn_printer(services.session.clone(), chat.clone());
            let outcome = compose.send_message(chat.as_deref(), model, request).await?;
            let result = outcome.stream.join().await;
            printer.abort();
            println!();
            if result != StreamOutcome::Completed {
                anyhow::bail!("chat {}: stream ended with {result:?}", outcome.chat_id);
            }
        }
    }
    Ok(())
}

/// Echoes pending-message text to stdout as it arrives.
fn spawn_printer(
    session: SharedSessionStore,
    chat_id: Option<String>,
) -> tokio::task::JoinHandle<()> {
    let mut events = session.lock().subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(SessionEvent::PendingUpdated { chat_id: id, content, .. })
                    if chat_id.as_deref().is_none_or(|wanted| wanted == id) =>
                {
                    print!("{content}");
                    let _ = std::io::stdout().flush();
                }
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            }
        }
    })
}
