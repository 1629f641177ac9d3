use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use frames::HistoryRecord;
use serde_json::{Value, json};
use threadline::{
    ApiClient, ApiError, ChatApi, ChatSession, ClientConfig, ConfigError, ConnectionState, MessageId, Notification,
    SessionError, ThreadId, ThreadMessage, TransportConfig, TungsteniteConnector,
};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("timed out waiting for the socket to open")]
    ConnectTimeout,
    #[error("invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("failed to listen for ctrl-c: {0}")]
    Signal(#[from] std::io::Error),
}

#[derive(Parser, Debug)]
#[command(name = "threadline", about = "Chat session transport CLI")]
struct Cli {
    #[arg(long, env = "THREADLINE_API_URL", default_value = threadline::config::DEFAULT_API_URL)]
    api_url: String,

    /// Socket base URL; derived from the API URL when omitted.
    #[arg(long, env = "THREADLINE_WS_URL")]
    ws_url: Option<String>,

    #[arg(long, env = "THREADLINE_ACCESS_TOKEN")]
    access_token: Option<String>,

    #[arg(long, env = "THREADLINE_REFRESH_TOKEN")]
    refresh_token: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print a thread's stored history as JSON lines.
    History { thread_id: ThreadId },
    /// Follow a thread live until ctrl-c.
    Tail { thread_id: ThreadId },
    /// Send one message and print the thread tail once it is confirmed.
    Send(SendArgs),
}

#[derive(Args, Debug)]
struct SendArgs {
    thread_id: ThreadId,
    content: String,
    /// How long to wait for the socket, the echo and a reply.
    #[arg(long, default_value_t = 15)]
    wait_secs: u64,
}

#[tokio::main]
async fn main() -> Result<(), CliError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = client_config(&cli)?;

    match cli.command {
        Command::History { thread_id } => run_history(&config, thread_id).await,
        Command::Tail { thread_id } => run_tail(config, thread_id).await,
        Command::Send(args) => run_send(config, args).await,
    }
}

fn client_config(cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = ClientConfig::new(&cli.api_url)?;
    if let Some(ws_url) = &cli.ws_url {
        config = config.with_ws_url(ws_url)?;
    }
    config.access_token.clone_from(&cli.access_token);
    config.refresh_token.clone_from(&cli.refresh_token);
    config.transport = TransportConfig::from_env();
    Ok(config)
}

fn start_session(config: ClientConfig) -> Result<ChatSession, CliError> {
    let api = ApiClient::new(&config)?;
    Ok(ChatSession::start(config, Arc::new(api), Arc::new(TungsteniteConnector)))
}

// =============================================================================
// COMMANDS
// =============================================================================

async fn run_history(config: &ClientConfig, thread_id: ThreadId) -> Result<(), CliError> {
    let api = ApiClient::new(config)?;
    for record in api.thread_history(thread_id).await? {
        println!("{}", record_json(&record)?);
    }
    Ok(())
}

async fn run_tail(config: ClientConfig, thread_id: ThreadId) -> Result<(), CliError> {
    let session = start_session(config)?;
    let mut notifications = session.notifications();
    let mut revisions = session.store().watch();
    let mut printed = HashSet::new();

    let messages = session.open_thread(thread_id).await?;
    print_new(&messages, &mut printed);

    loop {
        tokio::select! {
            changed = revisions.changed() => {
                if changed.is_err() {
                    break;
                }
                print_new(&session.messages(thread_id), &mut printed);
            }
            notification = notifications.recv() => match notification {
                Ok(Notification::AuthExpired) => return Err(SessionError::AuthExpired.into()),
                Ok(notification) => eprintln!("{}", describe(&notification)),
                Err(RecvError::Lagged(skipped)) => tracing::warn!(skipped, "notifications lagged"),
                Err(RecvError::Closed) => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                break;
            }
        }
    }

    session.shutdown().await;
    Ok(())
}

async fn run_send(config: ClientConfig, args: SendArgs) -> Result<(), CliError> {
    let wait = Duration::from_secs(args.wait_secs);
    let session = start_session(config)?;
    session.open_thread(args.thread_id).await?;

    let mut state = session.watch_state();
    tokio::time::timeout(wait, state.wait_for(|s| *s == ConnectionState::Open))
        .await
        .map_err(|_| CliError::ConnectTimeout)?
        .map_err(|_| CliError::ConnectTimeout)?;

    let provisional = session.send(args.thread_id, args.content).await?;
    let mut revisions = session.store().watch();
    let settled = tokio::time::timeout(wait, async {
        while !is_settled(&session.messages(args.thread_id), provisional) {
            if revisions.changed().await.is_err() {
                break;
            }
        }
    })
    .await;
    if settled.is_err() {
        eprintln!("no confirmed reply within {}s", args.wait_secs);
    }

    let messages = session.messages(args.thread_id);
    for message in &messages[messages.len().saturating_sub(5)..] {
        println!("{}", message_json(message));
    }

    session.shutdown().await;
    Ok(())
}

// =============================================================================
// HELPERS
// =============================================================================

/// The send is confirmed and a bot message follows it.
fn is_settled(messages: &[ThreadMessage], provisional: MessageId) -> bool {
    !messages.iter().any(|m| m.id == provisional) && messages.last().is_some_and(|m| m.is_bot)
}

fn print_new(messages: &[ThreadMessage], printed: &mut HashSet<MessageId>) {
    for message in messages {
        if !message.id.is_provisional() && printed.insert(message.id) {
            println!("{}", message_json(message));
        }
    }
}

fn message_json(message: &ThreadMessage) -> Value {
    json!({
        "id": message.id.to_string(),
        "content": message.content,
        "is_bot": message.is_bot,
        "timestamp": message.timestamp,
    })
}

fn record_json(record: &HistoryRecord) -> Result<String, CliError> {
    Ok(serde_json::to_string(record)?)
}

fn describe(notification: &Notification) -> String {
    match notification {
        Notification::Connected => "connected".to_owned(),
        Notification::Reconnecting { delay } => format!("reconnecting in {:.1}s", delay.as_secs_f64()),
        Notification::ConnectionError { message } => format!("connection error: {message}"),
        Notification::ServerError { message } => format!("server error: {message}"),
        Notification::AuthExpired => "authentication expired".to_owned(),
    }
}
