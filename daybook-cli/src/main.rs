//! Daybook CLI
//!
//! Thin command-line front end over the Daybook client: HTTP calls go
//! through the resilient request pipeline, `listen` and `send` use the
//! persistent socket.

mod config;
mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use daybook_client::{ApiClient, ConnectionManager, Credentials, Envelope, FileStore};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// How long `send` waits for the connection and for a reply
const SEND_WAIT: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "daybook", version, about = "Daybook journal client")]
struct Cli {
    /// Config file (defaults to the per-user data directory)
    #[arg(long, global = true, env = "DAYBOOK_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging regardless of RUST_LOG
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Check that the server is up
    Health,
    /// Log in and remember the token
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "DAYBOOK_PASSWORD")]
        password: String,
    },
    /// Create an account and remember the token
    Register {
        #[arg(long)]
        email: String,
        #[arg(long, env = "DAYBOOK_PASSWORD")]
        password: String,
    },
    /// Forget the stored token
    Logout,
    /// List journal entries
    Entries,
    /// Save a journal entry
    Save {
        #[arg(long)]
        title: String,
        #[arg(long)]
        content: String,
    },
    /// Stream socket messages until Ctrl-C
    Listen,
    /// Send one socket message and print the first reply
    Send {
        /// Message type, e.g. GET_ENTRIES
        #[arg(long = "type")]
        kind: String,
        /// JSON payload
        #[arg(long, default_value = "null")]
        data: String,
    },
    /// Print the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    let cli = Cli::parse();
    logging::init_logging(cli.verbose);

    let config = config::load(cli.config.as_deref())?;
    tracing::debug!(base_url = %config.base_url, socket_url = %config.socket_url, "Loaded configuration");

    match cli.command {
        Command::Config => print_json(&serde_json::to_value(&config)?),
        Command::Listen => listen(ConnectionManager::new(&config)).await,
        Command::Send { kind, data } => {
            let data: Value = serde_json::from_str(&data).context("--data is not valid JSON")?;
            send(ConnectionManager::new(&config), Envelope::new(kind, data)).await
        }
        command => {
            let store = Arc::new(FileStore::open(config::store_path()));
            let api = ApiClient::with_store(config, store)?;
            // A fresh process has no evidence of being offline
            api.set_online(true);
            run_api(&api, command).await
        }
    }
}

async fn run_api(api: &ApiClient, command: Command) -> Result<()> {
    match command {
        Command::Health => print_json(&api.health().await?),
        Command::Login { email, password } => {
            let session = api.login(&Credentials::new(email, password)).await?;
            println!("Logged in");
            if let Some(user) = session.user {
                print_json(&user)?;
            }
            Ok(())
        }
        Command::Register { email, password } => {
            api.register(&Credentials::new(email, password)).await?;
            println!("Registered and logged in");
            Ok(())
        }
        Command::Logout => {
            if let Err(e) = api.logout().await {
                tracing::warn!(error = %e, "Server logout failed; local token cleared anyway");
            }
            println!("Logged out");
            Ok(())
        }
        Command::Entries => {
            let entries: Vec<Value> = api.list_entries().await?;
            if entries.is_empty() {
                println!("No entries");
            }
            for entry in entries {
                print_json(&entry)?;
            }
            Ok(())
        }
        Command::Save { title, content } => {
            let entry = json!({
                "title": title,
                "content": content,
                "createdAt": chrono::Utc::now().to_rfc3339(),
            });
            let saved: Value = api.save_entry(&entry).await?;
            print_json(&saved)
        }
        Command::Config | Command::Listen | Command::Send { .. } => {
            bail!("not an HTTP command")
        }
    }
}

async fn listen(socket: ConnectionManager) -> Result<()> {
    socket.on_status(|connected| {
        if *connected {
            eprintln!("* connected");
        } else {
            eprintln!("* disconnected");
        }
    });
    socket.on_message(|envelope| {
        let stamp = chrono::Local::now().format("%H:%M:%S");
        println!("{stamp} {} {}", envelope.kind, envelope.data);
    });

    if !socket.connect() {
        bail!("socket is already connecting");
    }
    tokio::signal::ctrl_c().await?;
    socket.disconnect();
    Ok(())
}

async fn send(socket: ConnectionManager, envelope: Envelope) -> Result<()> {
    let (status_tx, mut status_rx) = mpsc::unbounded_channel();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel();
    socket.on_status(move |connected| {
        let _ = status_tx.send(*connected);
    });
    socket.on_message(move |reply| {
        if !reply.is(daybook_client::envelope::CONNECTED) {
            let _ = reply_tx.send(reply.clone());
        }
    });

    socket.connect();
    let connected = tokio::time::timeout(SEND_WAIT, async {
        while let Some(up) = status_rx.recv().await {
            if up {
                return true;
            }
        }
        false
    })
    .await
    .unwrap_or(false);

    if !connected || !socket.send_message(&envelope) {
        socket.disconnect();
        bail!("could not reach {}", socket.config().url);
    }

    let reply = tokio::time::timeout(SEND_WAIT, reply_rx.recv()).await;
    socket.disconnect();
    match reply {
        Ok(Some(reply)) => print_json(&serde_json::to_value(reply)?),
        _ => bail!("no reply within {SEND_WAIT:?}"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
