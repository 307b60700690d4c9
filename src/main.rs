//! casegate command-line entry point

use std::path::PathBuf;

use casegate::Config;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod cli;

/// casegate: case access-control engine
#[derive(Parser, Debug)]
#[command(name = "casegate")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Path to the JSON snapshot of the access-control store
    #[arg(short, long, global = true, default_value = "casegate.json")]
    snapshot: PathBuf,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable JSON logging format
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the effective access the resolver computes for a user
    Resolve {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Explain a single case instead of listing every case
        #[arg(long)]
        case: Option<i64>,
    },
    /// Check a user's cached access to a case
    Check {
        /// User ID
        #[arg(short, long)]
        user: i64,
        /// Case ID
        #[arg(long)]
        case: i64,
        /// Acceptable access level (repeatable; none accepts any access)
        #[arg(short, long)]
        require: Vec<String>,
    },
    /// Synchronize the effective-access cache
    Sync {
        /// Only synchronize this user
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Clear and rebuild the whole effective-access cache
    Rebuild,
    /// Compare the cache with the resolver without writing
    Verify {
        /// Only verify this user
        #[arg(short, long)]
        user: Option<i64>,
    },
    /// Create default groups and rebuild the cache
    Bootstrap,
}

fn init_tracing(config: &Config, json_logs: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));

    if json_logs || config.logging.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = if let Some(path) = &args.config {
        Config::from_file(path)?
    } else {
        Config::load()?
    };

    init_tracing(&config, args.json_logs);
    tracing::debug!("casegate v{}", env!("CARGO_PKG_VERSION"));

    let session = cli::Session::open(&config, &args.snapshot)?;

    match args.command {
        Command::Resolve { user, case } => cli::run_resolve(&session, user, case, args.json).await,
        Command::Check {
            user,
            case,
            require,
        } => cli::run_check(&session, user, case, require, args.json).await,
        Command::Sync { user } => cli::run_sync(&session, user, args.json).await,
        Command::Rebuild => cli::run_rebuild(&session, args.json).await,
        Command::Verify { user } => cli::run_verify(&session, user, args.json).await,
        Command::Bootstrap => cli::run_bootstrap(&session, args.json).await,
    }
}
