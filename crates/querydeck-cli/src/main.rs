//! querydeck - command-line front end for dashboard sessions.
//!
//! Signs in against the querydeck API, keeps the session's tokens fresh and
//! reports on the stored session. Run with `RUST_LOG=debug` to see the
//! session manager at work.

mod notifier;

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use querydeck_core::auth::{AuthSessionManager, Credentials, Session, SessionState};
use querydeck_core::cache::ProfileCache;
use querydeck_core::config::{Config, StorageBackend};

use notifier::TerminalNotifier;

const EMAIL_ENV: &str = "QUERYDECK_EMAIL";
const PASSWORD_ENV: &str = "QUERYDECK_PASSWORD";
const COMPANY_ENV: &str = "QUERYDECK_COMPANY";

#[derive(Debug, Parser)]
#[command(name = "querydeck", version, about = "Manage querydeck dashboard sessions")]
struct Cli {
    /// API endpoint for this run (overrides QUERYDECK_API_URL and the config file)
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Token storage backend: file, keyring or memory
    #[arg(long, global = true)]
    storage: Option<StorageBackend>,

    /// Keep tokens in memory only; nothing is written to disk
    #[arg(long, global = true)]
    ephemeral: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Sign in and store the session
    Login {
        #[arg(long)]
        email: Option<String>,
        /// Company slug
        #[arg(long)]
        company: Option<String>,
    },
    /// Sign out and clear stored tokens
    Logout,
    /// Verify the stored session with the server and print it
    Whoami,
    /// Print stored token expiry without contacting the server
    Status,
    /// Change the signed-in user's name
    Profile {
        #[arg(long)]
        first_name: String,
        #[arg(long)]
        last_name: String,
    },
    /// Restore the session and keep it fresh, printing every change until Ctrl-C
    Watch,
}

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr through a non-blocking writer; the returned guard must
/// stay alive for buffered lines to be flushed.
fn init_tracing() -> WorkerGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let (writer, guard) = tracing_appender::non_blocking(io::stderr());

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(writer))
        .with(filter)
        .init();
    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let _guard = init_tracing();

    let mut config = Config::load().context("Failed to load config")?;
    if let Some(url) = cli.api_url.clone() {
        config.api_url_override = Some(url);
    }
    if let Some(storage) = cli.storage {
        config.storage = storage;
    }
    if cli.ephemeral {
        config.storage = StorageBackend::Memory;
    }
    info!(api_url = %config.api_url(), storage = ?config.storage, "querydeck starting");

    let manager = AuthSessionManager::from_config(&config, Arc::new(TerminalNotifier))?;
    run(cli.command, &manager, &mut config).await
}

async fn run(command: Command, manager: &Arc<AuthSessionManager>, config: &mut Config) -> Result<()> {
    let cache = profile_cache(config);
    let cache = cache.as_ref();
    match command {
        Command::Login { email, company } => {
            let credentials = prompt_credentials(config, email, company)?;
            let email = credentials.email.clone();
            let company = credentials.company_slug.clone();
            let session = manager.login(credentials).await?;

            if !session.is_degraded {
                config.last_email = Some(email);
                config.last_company = Some(company);
                if let Err(e) = config.save() {
                    tracing::warn!(error = %e, "Failed to remember login details");
                }
            }
            print_session(&session, cache);
        }
        Command::Logout => {
            manager.logout().await;
            println!("Signed out");
        }
        Command::Whoami => {
            let session = manager.check_auth().await;
            print_session(&session, cache);
        }
        Command::Profile {
            first_name,
            last_name,
        } => {
            let session = manager.check_auth().await;
            if !session.is_authenticated() {
                bail!("Not signed in. Run `querydeck login` first.");
            }
            let user = manager.update_profile(&first_name, &last_name).await?;
            println!("{} <{}>", user.full_name(), user.email);
        }
        Command::Watch => watch(manager, cache).await?,
        Command::Status => status(config)?,
    }
    Ok(())
}

async fn watch(manager: &Arc<AuthSessionManager>, cache: Option<&ProfileCache>) -> Result<()> {
    let mut updates = manager.subscribe();
    let session = manager.check_auth().await;
    print_session(&session, cache);
    if !session.is_authenticated() {
        return Ok(());
    }
    updates.borrow_and_update();

    let mut last_state = session.state;
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let session = updates.borrow_and_update().clone();
                let expiry = session
                    .tokens
                    .as_ref()
                    .map(|t| format!(" (expires in {}s)", t.seconds_until_expiry()))
                    .unwrap_or_default();
                println!(
                    "{} {} -> {}{}",
                    Local::now().format("%H:%M:%S"),
                    last_state.label(),
                    session.state.label(),
                    expiry
                );
                last_state = session.state;
                if matches!(session.state, SessionState::Expired | SessionState::Unauthenticated) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }
    Ok(())
}

/// Report the stored tokens without touching the network.
fn status(config: &Config) -> Result<()> {
    let store = config.token_store()?;
    println!("Endpoint: {}", config.api_url());
    match store.load()? {
        Some(pair) if pair.is_expired() => {
            println!(
                "Stored session expired at {}",
                pair.expires_at.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S")
            );
        }
        Some(pair) => {
            let lead = chrono::Duration::from_std(config.refresh_lead()).unwrap_or_default();
            println!(
                "Stored session valid for {}s (renewal due at {})",
                pair.seconds_until_expiry(),
                (pair.expires_at - lead)
                    .max(Utc::now())
                    .with_timezone(&Local)
                    .format("%H:%M:%S")
            );
        }
        None => println!("No stored session"),
    }
    Ok(())
}

/// The profile cache the session manager writes, if the storage backend has one.
fn profile_cache(config: &Config) -> Option<ProfileCache> {
    match config.storage {
        StorageBackend::Memory => None,
        _ => config.cache_dir().ok().map(ProfileCache::new),
    }
}

/// Describe a degraded session, naming how old the cached identity behind it is.
fn offline_note(session: &Session, cache: Option<&ProfileCache>) -> String {
    let cached = cache.and_then(|cache| cache.load_profile().ok().flatten());
    match (cached, session.user_id()) {
        (Some(cached), Some(id)) if cached.data.user.id == id => {
            format!("offline (profile last verified {})", cached.age_display())
        }
        _ => "offline (local session, not verified by the server)".to_string(),
    }
}

fn print_session(session: &Session, cache: Option<&ProfileCache>) {
    let Some(user) = session.user.as_ref().filter(|_| session.is_authenticated()) else {
        println!("Not signed in ({})", session.state.label());
        return;
    };
    println!("{} <{}>", user.full_name(), user.email);
    println!("  id:      {}", user.id);
    println!("  role:    {}", user.role);
    if let Some(company) = &session.company {
        println!("  company: {} ({})", company.name, company.slug);
    }
    println!("  state:   {}", session.state.label());
    if session.is_degraded {
        println!("  mode:    {}", offline_note(session, cache));
    } else if let Some(tokens) = &session.tokens {
        println!("  expires: {}s", tokens.seconds_until_expiry());
    }
}

fn prompt_credentials(
    config: &Config,
    email: Option<String>,
    company: Option<String>,
) -> Result<Credentials> {
    let email = match email.or_else(|| std::env::var(EMAIL_ENV).ok()) {
        Some(email) => email,
        None => prompt_line("Email", config.last_email.as_deref())?,
    };
    let company = match company.or_else(|| std::env::var(COMPANY_ENV).ok()) {
        Some(company) => company,
        None => prompt_line("Company", config.last_company.as_deref())?,
    };
    let password = match std::env::var(PASSWORD_ENV) {
        Ok(password) => password,
        Err(_) => rpassword::prompt_password("Password: ").context("Failed to read password")?,
    };

    if email.trim().is_empty() || password.is_empty() {
        bail!("Email and password are required");
    }
    Ok(Credentials::new(email.trim(), password, company.trim()))
}

fn prompt_line(label: &str, default: Option<&str>) -> Result<String> {
    match default {
        Some(default) => print!("{} [{}]: ", label, default),
        None => print!("{}: ", label),
    }
    io::stdout().flush()?;

    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    let line = line.trim();
    Ok(match (line.is_empty(), default) {
        (true, Some(default)) => default.to_string(),
        _ => line.to_string(),
    })
}
