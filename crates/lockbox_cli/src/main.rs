//! Lockbox CLI
//!
//! Command-line client and server for the Lockbox vault.
//!
//! # Commands
//!
//! - `serve` - Run the sync server
//! - `register` / `login` - Create or resume a session
//! - `add` - Encrypt and save a block
//! - `list` - List known blocks
//! - `show` - Decrypt and print a block
//! - `sync` - Stay connected and follow live updates until Ctrl-C

mod commands;

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Lockbox secret manager.
#[derive(Parser)]
#[command(name = "lockbox")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Server address
    #[arg(global = true, short, long, default_value = "127.0.0.1:7878")]
    server: String,

    /// Path to the local state file
    #[arg(global = true, long, default_value = "lockbox.json")]
    state: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the sync server
    Serve {
        /// Address to listen on
        #[arg(short, long, default_value = "127.0.0.1:7878")]
        addr: SocketAddr,

        /// Stream deadline in seconds
        #[arg(long, default_value = "600")]
        deadline: u64,

        /// Token signing secret (random if omitted; tokens then die with the process)
        #[arg(long)]
        secret: Option<String>,
    },

    /// Create an account
    Register {
        /// Username
        #[arg(short, long)]
        user: String,

        /// Account password
        #[arg(short, long)]
        password: String,
    },

    /// Log in to an existing account
    Login {
        /// Username
        #[arg(short, long)]
        user: String,

        /// Account password
        #[arg(short, long)]
        password: String,
    },

    /// Encrypt and save a block
    Add {
        /// Block title
        #[arg(short, long)]
        title: String,

        /// Block type (text, credentials, bank_card, file)
        #[arg(long = "type", default_value = "text")]
        kind: String,

        /// Encryption password
        #[arg(short, long)]
        password: String,

        /// Key derivation profile (v1, v2, v3)
        #[arg(long)]
        profile: Option<String>,

        /// Text payload
        #[arg(long, conflicts_with = "file")]
        text: Option<String>,

        /// Read the payload from a file
        #[arg(long)]
        file: Option<PathBuf>,
    },

    /// List known blocks
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Decrypt and print a block
    Show {
        /// Block ID
        #[arg(short, long)]
        id: u64,

        /// Encryption password
        #[arg(short, long)]
        password: String,
    },

    /// Stay connected and follow live updates until Ctrl-C
    Sync,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let session = commands::Session::new(cli.server, cli.state);

    match cli.command {
        Commands::Serve {
            addr,
            deadline,
            secret,
        } => {
            commands::serve::run(addr, deadline, secret).await?;
        }
        Commands::Register { user, password } => {
            commands::account::run(&session, commands::account::Action::Register, &user, &password)
                .await?;
        }
        Commands::Login { user, password } => {
            commands::account::run(&session, commands::account::Action::Login, &user, &password)
                .await?;
        }
        Commands::Add {
            title,
            kind,
            password,
            profile,
            text,
            file,
        } => {
            let payload = match (text, file) {
                (Some(text), None) => commands::add::Payload::Text(text),
                (None, Some(path)) => commands::add::Payload::File(path),
                _ => return Err("exactly one of --text or --file is required".into()),
            };
            commands::add::run(&session, &title, &kind, &password, profile.as_deref(), payload)
                .await?;
        }
        Commands::List { format } => {
            commands::list::run(&session, &format).await?;
        }
        Commands::Show { id, password } => {
            commands::show::run(&session, id, &password).await?;
        }
        Commands::Sync => {
            commands::sync::run(&session).await?;
        }
    }

    Ok(())
}
