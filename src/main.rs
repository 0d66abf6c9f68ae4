// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use session_vault::{
    load_master_key_from_env, mask_session_id, EngineSettings, InMemoryStore, KeyHierarchy, MasterKey,
    OutboundDirective, RedisStore, SessionManager, SessionStore,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// session-vault - Envelope-encrypted conversation sessions.
#[derive(Parser)]
#[command(name = "session-vault")]
#[command(version = VERSION)]
#[command(about = "Envelope-encrypted conversation sessions over a TTL key-value store.")]
#[command(long_about = "session-vault - Envelope-encrypted conversation sessions\n\n\
    New master key:      session-vault keygen\n\
    Talk to the engine:  session-vault chat --session U1234\n\
    Record metadata:     session-vault inspect --session U1234\n\
    Delete a session:    session-vault clear --session U1234\n\n\
    MASTER_ENCRYPTION_KEY must be set for every command except keygen.\n\
    Set REDIS_URL to use Redis; otherwise sessions live in memory.")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Settings file (defaults to ~/.session-vault/config.json if present)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Verbose mode: debug logging
    #[arg(short = 'v', long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh base64 master key
    Keygen,

    /// Feed stdin lines through the engine as one user's messages
    ///
    /// Examples:
    ///   session-vault chat --session U1234
    ///   printf 'start\n陳美麗\n' | session-vault chat --session U1234
    Chat {
        /// Session identifier (e.g. the platform user id)
        #[arg(short, long)]
        session: String,
    },

    /// Show stored record metadata without decrypting it
    Inspect {
        #[arg(short, long)]
        session: String,
    },

    /// Delete a stored session
    Clear {
        #[arg(short, long)]
        session: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Keygen => {
            let key = MasterKey::generate();
            println!("{}", key.to_base64().as_str());
            eprintln!("{} Store this as MASTER_ENCRYPTION_KEY. It is not saved anywhere.", "[i]".cyan());
            Ok(())
        }
        Commands::Chat { session } => {
            let manager = build_manager(cli.config).await?;
            chat(&manager, &session).await
        }
        Commands::Inspect { session } => {
            let manager = build_manager(cli.config).await?;
            match manager.inspect(&session).await.context("Failed to read session")? {
                Some(summary) => {
                    println!("{} {}", "Session:".bold(), mask_session_id(&session));
                    println!("  schema version:    {}", summary.schema_version);
                    println!("  wrapped key:       {} bytes", summary.wrapped_key_len);
                    println!("  encrypted payload: {} bytes", summary.payload_len);
                }
                None => println!("{} No session stored for {}", "[i]".cyan(), mask_session_id(&session)),
            }
            Ok(())
        }
        Commands::Clear { session } => {
            let manager = build_manager(cli.config).await?;
            manager.clear(&session).await.context("Failed to clear session")?;
            println!("{} Cleared {}", "[✓]".green(), mask_session_id(&session));
            Ok(())
        }
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` with `--verbose`.
fn init_logging(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn build_manager(config: Option<PathBuf>) -> Result<SessionManager> {
    let settings = EngineSettings::load(config.as_deref()).context("Failed to load settings")?;
    let master = load_master_key_from_env().context("Failed to load master key")?;

    let store: Arc<dyn SessionStore> = match &settings.redis_url {
        Some(url) => {
            let connect = RedisStore::connect(url, &settings.key_prefix);
            let store = tokio::time::timeout(settings.store_timeout(), connect)
                .await
                .context("Timed out connecting to the session store")?
                .context("Failed to connect to the session store")?;
            Arc::new(store)
        }
        None => {
            tracing::warn!("REDIS_URL is not set; sessions are kept in memory and lost on exit");
            Arc::new(InMemoryStore::new())
        }
    };

    SessionManager::new(KeyHierarchy::new(master), store, settings).context("Invalid engine settings")
}

async fn chat(manager: &SessionManager, session: &str) -> Result<()> {
    println!(
        "{} Session {}. Type \"start\" to begin, \"cancel\" to reset, Ctrl-D to quit.",
        "session-vault".bright_cyan().bold(),
        mask_session_id(session)
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }
        let directive = manager.handle_turn(session, &line).await;
        println!("{}", render(&directive));
    }
    Ok(())
}

fn render(directive: &OutboundDirective) -> String {
    let message = directive.message();
    match directive {
        OutboundDirective::PromptField { .. } | OutboundDirective::AwaitingStart => message.cyan().to_string(),
        OutboundDirective::ValidationError { .. } => format!("{} {}", "[!]".yellow(), message),
        OutboundDirective::Ready => format!("{} {}", "[✓]".green(), message),
        OutboundDirective::Forward { fields, text } => format!(
            "{} {} ({} profile fields, {} chars; no answering service configured)",
            "[→]".bright_blue(),
            message,
            fields.len(),
            text.chars().count()
        ),
        OutboundDirective::Answer { .. } => message,
        OutboundDirective::SessionCleared | OutboundDirective::SessionReset => {
            format!("{} {}", "[i]".cyan(), message)
        }
        OutboundDirective::RetryLater { .. } => format!("{} {}", "[✗]".red(), message),
    }
}
