use std::{collections::HashSet, path::PathBuf, sync::Arc};

use anyhow::{bail, Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use client_core::{ClientEvent, ConversationContext, Message, RosterEntry, SyncClient};
use shared::domain::{DeliveryState, MessageId, UserId};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod settings;
mod token_store;

use settings::load_settings;
use token_store::FileTokenStore;

#[derive(Parser, Debug)]
#[command(name = "chat-cli", about = "Terminal client for the global channel and direct threads")]
struct Args {
    /// Backend base url, e.g. http://127.0.0.1:8787
    #[arg(long)]
    server_url: Option<String>,
    /// Settings file (defaults to ./chat-cli.toml when present)
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long)]
    token_file: Option<PathBuf>,
    #[arg(long)]
    poll_interval_ms: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    Login {
        username: String,
        #[arg(long)]
        password: String,
    },
    Signup {
        username: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// List the roster, optionally filtered, or search the server.
    Users {
        #[arg(long)]
        filter: Option<String>,
        #[arg(long, conflicts_with = "filter")]
        search: Option<String>,
    },
    AddUser {
        username: String,
        #[arg(long)]
        password: String,
    },
    /// Print a conversation once.
    History {
        /// Peer id or name; the global channel when omitted.
        #[arg(long)]
        to: Option<String>,
    },
    Send {
        text: String,
        #[arg(long)]
        to: Option<String>,
    },
    Delete {
        id: String,
        #[arg(long)]
        to: Option<String>,
    },
    /// Follow a conversation until interrupted.
    Watch {
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();

    let mut settings = load_settings(args.config.as_deref())?;
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    if let Some(token_file) = args.token_file {
        settings.token_path = Some(token_file);
    }
    if let Some(poll_interval_ms) = args.poll_interval_ms {
        settings.poll_interval_ms = poll_interval_ms;
    }

    let store = Arc::new(FileTokenStore::new(settings.token_path()));
    let client =
        SyncClient::new_with_token_store(&settings.server_url, &settings.sync_config(), store)?;
    info!(server_url = %settings.server_url, "chat-cli starting");

    let result = run(&client, args.command).await;
    client.scheduler().stop().await;
    result
}

async fn run(client: &SyncClient, command: Command) -> Result<()> {
    match command {
        Command::Login { username, password } => {
            let session = client.login(&username, &password).await?;
            println!(
                "Signed in as {}",
                session.identity.as_deref().unwrap_or(&username)
            );
        }
        Command::Signup { username, password } => {
            let session = client.signup(&username, &password).await?;
            println!(
                "Account created, signed in as {}",
                session.identity.as_deref().unwrap_or(&username)
            );
        }
        Command::Logout => {
            client.session_manager().restore().await;
            client.sign_out().await;
            println!("Signed out");
        }
        Command::Users { filter, search } => {
            require_session(client).await?;
            let entries = match search {
                Some(query) => client.directory().search(&query).await?,
                None => {
                    client.directory().refresh().await?;
                    client.directory().filter(filter.as_deref().unwrap_or("")).await
                }
            };
            for entry in entries {
                print_roster_entry(&entry);
            }
        }
        Command::AddUser { username, password } => {
            require_session(client).await?;
            client.directory().create_user(&username, &password).await?;
            println!("Created user {}", username.trim());
        }
        Command::History { to } => {
            require_session(client).await?;
            let context = load_conversation(client, to.as_deref()).await?;
            for message in client.timeline().await {
                print_message(&context, &message);
            }
        }
        Command::Send { text, to } => {
            require_session(client).await?;
            load_conversation(client, to.as_deref()).await?;
            let local_id = client.send(&text).await?;
            println!("Sent ({local_id})");
        }
        Command::Delete { id, to } => {
            require_session(client).await?;
            load_conversation(client, to.as_deref()).await?;
            client.delete(&MessageId::from(id.trim())).await?;
            println!("Deleted {}", id.trim());
        }
        Command::Watch { to } => {
            require_session(client).await?;
            watch(client, to.as_deref()).await?;
        }
    }
    Ok(())
}

/// Restores the saved session without starting the poller.
async fn require_session(client: &SyncClient) -> Result<()> {
    if !client.session_manager().restore().await.is_authenticated() {
        bail!("not signed in; run `chat-cli login <username> --password <password>` first");
    }
    Ok(())
}

/// Resolves `--to` against the roster (by id, then by name); the global channel when absent.
async fn resolve_conversation(client: &SyncClient, target: Option<&str>) -> ConversationContext {
    match target.map(str::trim).filter(|target| !target.is_empty()) {
        None => ConversationContext::Shared,
        Some(target) => {
            if let Err(err) = client.directory().refresh().await {
                warn!("roster unavailable: {err}");
            }
            let by_id = client.directory().find(&UserId::from(target)).await;
            let by_name = match by_id {
                Some(entry) => Some(entry),
                None => client
                    .directory()
                    .entries()
                    .await
                    .into_iter()
                    .find(|entry| entry.display_name.eq_ignore_ascii_case(target)),
            };
            match by_name {
                Some(entry) => ConversationContext::direct(&entry),
                None => {
                    warn!(peer = target, "peer not in roster, using it as a raw id");
                    ConversationContext::direct_to(target, target)
                }
            }
        }
    }
}

/// Makes the conversation active and fetches it once, without polling.
async fn load_conversation(
    client: &SyncClient,
    target: Option<&str>,
) -> Result<ConversationContext> {
    let context = resolve_conversation(client, target).await;
    client
        .reconciler()
        .switch_context(context.clone())
        .await
        .with_context(|| format!("failed to load {}", context.display_name()))?;
    Ok(context)
}

async fn watch(client: &SyncClient, target: Option<&str>) -> Result<()> {
    let mut events = client.subscribe_events();
    let context = resolve_conversation(client, target).await;
    client
        .open(context.clone())
        .await
        .with_context(|| format!("failed to load {}", context.display_name()))?;
    println!("Watching {} (ctrl-c to stop)", context.display_name());

    let mut printed = HashSet::new();
    print_new(&context, &client.timeline().await, &mut printed);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(ClientEvent::TimelineUpdated { context: updated, messages }) if updated == context => {
                    print_new(&context, &messages, &mut printed);
                }
                Ok(ClientEvent::Error(message)) => warn!("poll failed: {message}"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "event stream lagged"),
                Err(RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

/// Prints each message once per server id (or local id), and again if it is marked failed.
fn print_new(context: &ConversationContext, messages: &[Message], printed: &mut HashSet<String>) {
    for message in messages {
        let key = match (&message.id, message.local_id) {
            (Some(id), _) => id.to_string(),
            (None, Some(local_id)) => local_id.to_string(),
            (None, None) => format!("{}:{}", message.sender, message.body),
        };
        let key = if message.is_failed() {
            format!("{key}:failed")
        } else {
            key
        };
        if printed.insert(key) {
            print_message(context, message);
        }
    }
}

fn print_message(context: &ConversationContext, message: &Message) {
    let time = message
        .sent_at
        .map(|at| at.with_timezone(&Local).format("%H:%M").to_string())
        .unwrap_or_else(|| "--:--".to_string());
    let marker = match message.delivery {
        DeliveryState::Confirmed => "",
        DeliveryState::Pending => " (sending)",
        DeliveryState::Failed => " (not confirmed)",
    };
    let id = message
        .id
        .as_ref()
        .map(|id| format!(" #{id}"))
        .unwrap_or_default();
    println!(
        "[{time}] {}: {}{marker}{id}",
        context.sender_label(message),
        message.body
    );
}

fn print_roster_entry(entry: &RosterEntry) {
    if entry.subtitle.is_empty() {
        println!("{:>3}  {}  ({})", entry.initials(), entry.display_name, entry.id);
    } else {
        println!(
            "{:>3}  {}  ({}) - {}",
            entry.initials(),
            entry.display_name,
            entry.id,
            entry.subtitle
        );
    }
}
