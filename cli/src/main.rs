//! Clubchat CLI - terminal client for team chat

mod tui;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use clubchat::{ChatConfig, ChatSession, Identity, MessageId, RosterProfile};
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

const DEFAULT_FILTER: &str = "clubchat=info,clubchat_cli=info";

#[derive(Parser)]
#[command(name = "clubchat")]
#[command(about = "Terminal client for clubchat - team chat for amateur sports clubs")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    #[command(subcommand)]
    command: Commands,
}

/// Overrides for the `CLUBCHAT_*` settings
#[derive(Args)]
struct ConnectionArgs {
    /// REST gateway base URL
    #[arg(long, env = "CLUBCHAT_REST_URL", global = true)]
    rest_url: Option<String>,

    /// Realtime feed websocket URL
    #[arg(long, env = "CLUBCHAT_FEED_URL", global = true)]
    feed_url: Option<String>,

    /// API key for both endpoints
    #[arg(long, env = "CLUBCHAT_API_KEY", global = true, hide_env_values = true)]
    api_key: Option<String>,

    /// Messages per history page
    #[arg(long, env = "CLUBCHAT_PAGE_SIZE", global = true)]
    page_size: Option<usize>,
}

#[derive(Args)]
struct IdentityArgs {
    /// Your user id
    #[arg(short, long, env = "CLUBCHAT_USER")]
    user: Option<Uuid>,

    /// Your roster entry in the team
    #[arg(short, long)]
    roster: Option<Uuid>,

    /// Display name for your roster entry
    #[arg(short = 'n', long, default_value = "Me")]
    name: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Open a team's chat in the interactive TUI
    Chat {
        /// Team id
        #[arg(short, long)]
        team: Uuid,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Log file for the TUI session
        #[arg(long, default_value = "clubchat.log")]
        log_file: String,
    },

    /// Print a team's history, newest page first
    History {
        /// Team id
        #[arg(short, long)]
        team: Uuid,

        /// Pages to walk back
        #[arg(short, long, default_value_t = 1)]
        pages: usize,
    },

    /// Send a message (non-interactive)
    Send {
        /// Team id
        #[arg(short, long)]
        team: Uuid,

        #[command(flatten)]
        identity: IdentityArgs,

        /// Message body
        #[arg(short, long)]
        message: String,
    },

    /// Delete a message (non-interactive)
    Delete {
        /// Team id
        #[arg(short, long)]
        team: Uuid,

        /// Message id
        #[arg(long)]
        id: String,
    },
}

impl ConnectionArgs {
    fn into_config(self) -> Result<ChatConfig> {
        let mut config = ChatConfig::from_env();
        if let Some(url) = self.rest_url {
            config.rest_url = url;
        }
        if let Some(url) = self.feed_url {
            config.feed_url = url;
        }
        if self.api_key.is_some() {
            config.api_key = self.api_key;
        }
        if let Some(page_size) = self.page_size {
            config.page_size = page_size;
        }
        config.validate()?;
        Ok(config)
    }
}

impl IdentityArgs {
    fn into_identity(self) -> Identity {
        let Some(user_id) = self.user else {
            return Identity::anonymous();
        };
        let identity = Identity::user(user_id);
        match self.roster {
            Some(id) => identity.with_roster(RosterProfile {
                id,
                display_name: self.name,
                nickname: None,
                avatar_url: None,
            }),
            None => identity,
        }
    }
}

fn init_tracing(log_file: Option<&str>) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| DEFAULT_FILTER.into());

    match log_file {
        // The TUI owns the terminal, so logs go to a file
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_writer(std::io::stderr),
                )
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_file = match &cli.command {
        Commands::Chat { log_file, .. } => Some(log_file.clone()),
        _ => None,
    };
    init_tracing(log_file.as_deref())?;

    let config = cli.connection.into_config()?;

    match cli.command {
        Commands::Chat { team, identity, .. } => {
            run_chat(config, team, identity.into_identity()).await
        }
        Commands::History { team, pages } => run_history(config, team, pages).await,
        Commands::Send {
            team,
            identity,
            message,
        } => run_send(config, team, identity.into_identity(), &message).await,
        Commands::Delete { team, id } => run_delete(config, team, &id).await,
    }
}

async fn run_chat(config: ChatConfig, team: Uuid, identity: Identity) -> Result<()> {
    let session = ChatSession::connect(config, identity)?;
    session
        .open_team(team)
        .await
        .with_context(|| format!("Failed to open team {}", team))?;

    let session = std::sync::Arc::new(session);
    let result = tui::run(session.clone(), team).await;
    session.close().await;
    result
}

async fn run_history(config: ChatConfig, team: Uuid, pages: usize) -> Result<()> {
    let session = ChatSession::connect(config, Identity::anonymous())?;
    let mut page = session.open_team(team).await?;

    for _ in 1..pages.max(1) {
        if !page.may_have_more {
            break;
        }
        page = session.load_older().await?;
    }

    let messages = session.messages().await;
    session.close().await;

    if messages.is_empty() {
        println!("No messages yet.");
        return Ok(());
    }

    println!("{:─<60}", "");
    for message in &messages {
        println!(
            "{} {:<16} {}",
            message
                .created_at
                .with_timezone(&chrono::Local)
                .format("%Y-%m-%d %H:%M"),
            message.author_label(),
            message.body
        );
    }
    println!("{:─<60}", "");
    println!("{} messages", messages.len());

    Ok(())
}

async fn run_send(config: ChatConfig, team: Uuid, identity: Identity, message: &str) -> Result<()> {
    let session = ChatSession::connect(config, identity)?;
    session.open_team(team).await?;

    let sent = session.send(message).await;
    session.close().await;
    let sent = sent?;

    println!("Sent {} at {}", sent.id, sent.created_at.format("%H:%M:%S"));
    Ok(())
}

async fn run_delete(config: ChatConfig, team: Uuid, id: &str) -> Result<()> {
    let id: MessageId = id.parse().map_err(anyhow::Error::msg)?;

    let session = ChatSession::connect(config, Identity::anonymous())?;
    session.open_team(team).await?;

    let deleted = session.delete(&id).await;
    session.close().await;
    deleted?;

    println!("Deleted {}", id);
    Ok(())
}
