use anyhow::{Context, Result};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use gitpoor::clock;
use gitpoor::config::LoggingConfig;
use gitpoor::server::{self, ApiResponse};
use gitpoor::token;
use gitpoor::{AccessCredential, Config, SyncContext, SyncEngine, SyncError};

#[derive(Parser)]
#[command(name = "gitpoor")]
#[command(about = "Commit synchronization and streak accounting for GitPoor")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (defaults to XDG config location)
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP sync trigger and read endpoints
    Serve {
        /// Bind address (overrides server.bind)
        #[arg(long)]
        bind: Option<String>,
    },

    /// Sync today's commits for a user
    Sync {
        #[arg(long)]
        user: String,

        /// Skip the run when the last sync is more recent than the auto-sync threshold
        #[arg(long)]
        if_stale: bool,

        /// Use the group-view threshold with --if-stale
        #[arg(long, requires = "if_stale")]
        group: bool,
    },

    /// Show today's ledger summary for a user
    Today {
        #[arg(long)]
        user: String,
    },

    /// List a user's commits on one logical day
    Commits {
        #[arg(long)]
        user: String,

        /// Logical day (YYYY-MM-DD), defaults to today
        #[arg(long, value_parser = parse_day_arg)]
        date: Option<NaiveDate>,
    },

    /// Per-day commit totals over a date range
    History {
        #[arg(long)]
        user: String,

        #[arg(long, value_parser = parse_day_arg)]
        from: NaiveDate,

        #[arg(long, value_parser = parse_day_arg)]
        to: NaiveDate,
    },

    /// Manage linked GitHub accounts
    Account {
        #[command(subcommand)]
        account_command: AccountCommands,
    },
}

#[derive(Subcommand)]
enum AccountCommands {
    /// Store a GitHub login and token pair for a user
    Link {
        #[arg(long)]
        user: String,

        /// GitHub login whose activity is synced
        #[arg(long)]
        login: String,

        #[arg(long, env = "GITPOOR_ACCESS_TOKEN", hide_env_values = true)]
        access_token: String,

        #[arg(long, env = "GITPOOR_REFRESH_TOKEN", hide_env_values = true)]
        refresh_token: Option<String>,

        /// Access token lifetime in seconds
        #[arg(long, value_parser = clap::value_parser!(i64).range(1..=i64::from(u32::MAX)))]
        expires_in: Option<i64>,
    },
}

fn parse_day_arg(raw: &str) -> Result<NaiveDate, String> {
    clock::parse_day(raw).ok_or_else(|| format!("expected YYYY-MM-DD, got {}", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = load_config(cli.config).await?;

    init_logging(cli.verbose, &config.logging)?;
    info!("Starting GitPoor v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Serve { bind } => cmd_serve(bind, config).await,
        Commands::Sync {
            user,
            if_stale,
            group,
        } => cmd_sync(user, if_stale, group, config).await,
        Commands::Today { user } => {
            let engine = SyncEngine::from_config(config)?;
            print_envelope(engine.today_summary(&user, Utc::now()))
        }
        Commands::Commits { user, date } => {
            let engine = SyncEngine::from_config(config)?;
            let day = date.unwrap_or_else(|| clock::logical_day(Utc::now()));
            print_envelope(engine.commits_on(&user, day))
        }
        Commands::History { user, from, to } => {
            let engine = SyncEngine::from_config(config)?;
            print_envelope(engine.history(&user, from, to))
        }
        Commands::Account { account_command } => cmd_account(account_command, config).await,
    }
}

/// Initialize logging based on verbosity level and configured format
fn init_logging(verbose: bool, logging: &LoggingConfig) -> Result<()> {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    // Logs go to stderr so stdout carries only JSON envelopes
    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to initialize logging")?;
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
            .context("Failed to initialize logging")?;
    }

    Ok(())
}

/// Load configuration from specified path or default location
async fn load_config(config_path: Option<std::path::PathBuf>) -> Result<Config> {
    match config_path {
        Some(path) => Config::load(&path),
        None => Config::load_or_default(),
    }
}

/// Print a success or error envelope; errors exit non-zero
fn print_envelope<T: Serialize>(result: Result<T, SyncError>) -> Result<()> {
    match result {
        Ok(data) => {
            let body = serde_json::to_string_pretty(&ApiResponse::ok(data))
                .context("Failed to serialize response")?;
            println!("{}", body);
            Ok(())
        }
        Err(err) => {
            let body = serde_json::to_string_pretty(&ApiResponse::failure(&err))
                .context("Failed to serialize response")?;
            println!("{}", body);
            std::process::exit(1);
        }
    }
}

async fn cmd_serve(bind: Option<String>, config: Config) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    let engine = SyncEngine::from_config(config)?;
    server::serve(engine, &bind).await
}

async fn cmd_sync(user: String, if_stale: bool, group: bool, config: Config) -> Result<()> {
    let engine = SyncEngine::from_config(config)?;
    let now = Utc::now();

    if if_stale && !engine.should_auto_sync(&user, now, group)? {
        info!("Last sync for {} is recent, skipping", user);
        return print_envelope(engine.today_summary(&user, now));
    }

    let ctx = SyncContext::new(user, now);
    print_envelope(engine.run(&ctx).await)
}

async fn cmd_account(account_command: AccountCommands, config: Config) -> Result<()> {
    match account_command {
        AccountCommands::Link {
            user,
            login,
            access_token,
            refresh_token,
            expires_in,
        } => {
            let expires_at = match expires_in {
                Some(secs) => Some(
                    token::expiry_after(Utc::now(), secs)
                        .with_context(|| format!("--expires-in {} is out of range", secs))?,
                ),
                None => None,
            };
            let engine = SyncEngine::from_config(config)?;
            let credential = AccessCredential {
                access_token,
                refresh_token,
                expires_at,
            };
            engine
                .store()
                .link_account(&user, &login, &credential)
                .context("Failed to link account")?;

            println!("Linked GitHub account {} to user {}", login, user);
            Ok(())
        }
    }
}
