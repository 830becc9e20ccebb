//! Sessiongate - an interactive terminal client for a token-authenticated API.
//!
//! The login surface prompts for credentials; the protected shell fetches
//! resources through the auth gateway while every key press, click, scroll,
//! and mouse movement keeps the inactivity watchdog fed.

mod input;

use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
};
use futures::future::join_all;
use sessiongate_core::auth::{FileBackend, KeyringBackend, LoginRedirect, MemoryBackend, TierBackend};
use sessiongate_core::config::Config;
use sessiongate_core::api::Registration;
use sessiongate_core::{ApiClient, ApiError, AuthGateway, CredentialStore, Session, WatchdogConfig};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use input::activity_from_event;

// ============================================================================
// Constants
// ============================================================================

/// Timeout for polling terminal events (in milliseconds)
const EVENT_POLL_TIMEOUT_MS: u64 = 100;

/// Resource fetched from the protected shell when none is given
const DEFAULT_RESOURCE_PATH: &str = "/sessions/";

/// Concurrent calls fired by the burst command
const BURST_SIZE: usize = 3;

/// Keychain account for remembered sessions
const KEYRING_ACCOUNT: &str = "session";

/// Log file written while the terminal is in raw mode
const LOG_FILE: &str = "sessiongate.log";

/// Initialize the tracing subscriber for logging.
///
/// With a log directory, output goes to a file so it does not tear through
/// the raw-mode terminal; the returned guard flushes it on drop.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::never(dir, LOG_FILE);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

fn print_usage() {
    eprintln!("Usage: sessiongate [RESOURCE_PATH]");
    eprintln!("       sessiongate --register");
    eprintln!("       sessiongate --status");
    eprintln!("       sessiongate --logout");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  SESSIONGATE_API_BASE   API base URL (overrides config.json)");
    eprintln!("  RUST_LOG               log filter (default: warn)");
}

fn build_session(config: &Config) -> Result<Session> {
    let durable: Box<dyn TierBackend> = if config.use_keyring {
        Box::new(KeyringBackend::new(KEYRING_ACCOUNT))
    } else {
        Box::new(FileBackend::in_dir(&config.data_dir()?))
    };
    let store = CredentialStore::new(durable, Box::new(MemoryBackend::new()));
    let api = ApiClient::new(config.api_base())?;
    Ok(Session::new(api, store, config.refresh_timeout()))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let mut config = Config::load().context("Failed to load config")?;
    let args: Vec<String> = std::env::args().collect();

    match args.get(1).map(String::as_str) {
        Some("--help") | Some("-h") => {
            print_usage();
            return Ok(());
        }
        Some("--status") => {
            init_tracing(None);
            return show_status(&build_session(&config)?);
        }
        Some("--register") => {
            init_tracing(None);
            return register_surface(&build_session(&config)?, &mut config).await;
        }
        Some("--logout") => {
            init_tracing(None);
            build_session(&config)?.logout();
            println!("Logged out.");
            return Ok(());
        }
        Some(flag) if flag.starts_with("--") => {
            print_usage();
            anyhow::bail!("Unknown option: {}", flag);
        }
        _ => {}
    }

    let resource = args
        .get(1)
        .cloned()
        .unwrap_or_else(|| DEFAULT_RESOURCE_PATH.to_string());

    let data_dir = config.data_dir()?;
    std::fs::create_dir_all(&data_dir)?;
    let _log_guard = init_tracing(Some(&data_dir));
    info!(api_base = %config.api_base(), "Sessiongate starting");

    let session = build_session(&config)?;
    let result = run(&session, &mut config, &resource).await;

    info!("Sessiongate shutting down");
    result
}

fn show_status(session: &Session) -> Result<()> {
    let base = session.api().base_url();
    match session.credentials() {
        Some(stored) => println!(
            "Logged in to {} ({} storage, token saved {}).",
            base,
            stored.tier,
            stored.age_display()
        ),
        None => println!("Not logged in to {}.", base),
    }
    Ok(())
}

/// Create an account, then offer to log straight in with it.
async fn register_surface(session: &Session, config: &mut Config) -> Result<()> {
    let username = prompt("New username: ")?;
    if username.is_empty() {
        return Ok(());
    }
    let email = prompt("Email (optional): ")?;
    let password = rpassword::prompt_password("Password: ")?;
    let confirm = rpassword::prompt_password("Confirm password: ")?;
    if password != confirm {
        anyhow::bail!("Passwords do not match");
    }

    let registration = Registration {
        username: username.clone(),
        password,
        email: (!email.is_empty()).then_some(email),
    };
    session
        .register(&registration)
        .await
        .context("Registration failed")?;

    println!("Account {} created. Run `sessiongate` to log in.", username);
    config.last_username = Some(username);
    if let Err(e) = config.save() {
        warn!(error = %e, "Failed to save config");
    }
    Ok(())
}

/// Alternate between the login surface and the protected shell until the user quits.
async fn run(session: &Session, config: &mut Config, resource: &str) -> Result<()> {
    loop {
        if !session.is_authenticated() && !login_surface(session, config).await? {
            return Ok(());
        }
        match protected_shell(session, config, resource)? {
            ShellExit::Quit => return Ok(()),
            ShellExit::Login => continue,
        }
    }
}

/// Prompt for credentials. Returns false when the user gives up (empty username).
async fn login_surface(session: &Session, config: &mut Config) -> Result<bool> {
    if let Some(notice) = session.take_expired_notice() {
        println!("{}", notice);
    }

    loop {
        let default_user = config.last_username.clone().unwrap_or_default();
        let username = if default_user.is_empty() {
            prompt("Username: ")?
        } else {
            let entered = prompt(&format!("Username [{}]: ", default_user))?;
            if entered.is_empty() {
                default_user
            } else {
                entered
            }
        };
        if username.is_empty() {
            return Ok(false);
        }

        let password = rpassword::prompt_password("Password: ")?;
        let remember = !matches!(
            prompt("Remember me? [Y/n]: ")?.to_lowercase().as_str(),
            "n" | "no"
        );

        match session.login(&username, &password, remember).await {
            Ok(()) => {
                config.last_username = Some(username);
                if let Err(e) = config.save() {
                    warn!(error = %e, "Failed to save config");
                }
                return Ok(true);
            }
            Err(ApiError::Unauthorized) => println!("Invalid username or password."),
            Err(e) => println!("Login failed: {}", e),
        }
    }
}

fn prompt(label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush()?;
    let mut line = String::new();
    io::stdin().read_line(&mut line)?;
    Ok(line.trim().to_string())
}

enum ShellExit {
    Quit,
    Login,
}

/// Results sent back from background fetch tasks.
enum FetchResult {
    Fetched { label: String, summary: String },
    Failed {
        label: String,
        error: String,
        logged_out: bool,
    },
    BurstDone { refresh_calls: u64 },
}

/// Print a line while the terminal is in raw mode.
fn say(line: &str) {
    print!("{}\r\n", line);
    let _ = io::stdout().flush();
}

fn protected_shell(session: &Session, config: &Config, resource: &str) -> Result<ShellExit> {
    // Protected surface: bounce to login if the session vanished meanwhile.
    let mut redirects = session.signals().subscribe();
    if session.require_authenticated().is_err() {
        return Ok(ShellExit::Login);
    }
    let _ = redirects.try_recv();

    let watchdog = session.start_watchdog(WatchdogConfig::with_window(config.inactivity_window()));
    let (tx, mut rx) = mpsc::channel::<FetchResult>(32);

    enable_raw_mode()?;
    execute!(io::stdout(), EnableMouseCapture)?;
    say(&format!(
        "Logged in. [r] fetch {}  [b] burst x{}  [l] logout  [q] quit  (idle logout after {} min)",
        resource,
        BURST_SIZE,
        config.inactivity_window().as_secs() / 60
    ));

    let exit = shell_loop(session, resource, &watchdog, &tx, &mut rx, &mut redirects);

    execute!(io::stdout(), DisableMouseCapture)?;
    disable_raw_mode()?;
    watchdog.stop();
    exit
}

fn shell_loop(
    session: &Session,
    resource: &str,
    watchdog: &sessiongate_core::ActivityWatchdog,
    tx: &mpsc::Sender<FetchResult>,
    rx: &mut mpsc::Receiver<FetchResult>,
    redirects: &mut broadcast::Receiver<LoginRedirect>,
) -> Result<ShellExit> {
    loop {
        // Poll for events with timeout to allow background updates
        if event::poll(Duration::from_millis(EVENT_POLL_TIMEOUT_MS))? {
            let event = event::read()?;
            if let Some(signal) = activity_from_event(&event) {
                watchdog.observe(signal);
            }

            if let Event::Key(key) = event {
                if key.kind != KeyEventKind::Press {
                    continue;
                }
                match key.code {
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                        return Ok(ShellExit::Quit)
                    }
                    KeyCode::Char('q') => return Ok(ShellExit::Quit),
                    KeyCode::Char('l') => {
                        session.logout();
                        say("Logged out.");
                        return Ok(ShellExit::Login);
                    }
                    KeyCode::Char('r') => {
                        say(&format!("Fetching {} ...", resource));
                        spawn_fetch(session.gateway().clone(), resource.to_string(), tx.clone());
                    }
                    KeyCode::Char('b') => {
                        say(&format!("Firing {} concurrent requests ...", BURST_SIZE));
                        spawn_burst(session.gateway().clone(), resource.to_string(), tx.clone());
                    }
                    _ => {}
                }
            }
        }

        // Check for completed background tasks
        while let Ok(result) = rx.try_recv() {
            match result {
                FetchResult::Fetched { label, summary } => say(&format!("{}: {}", label, summary)),
                FetchResult::Failed {
                    label,
                    error,
                    logged_out,
                } => {
                    say(&format!("{}: failed - {}", label, error));
                    if logged_out && !session.is_authenticated() {
                        return Ok(ShellExit::Login);
                    }
                }
                FetchResult::BurstDone { refresh_calls } => {
                    say(&format!("Burst complete ({} refresh calls so far)", refresh_calls))
                }
            }
        }

        match redirects.try_recv() {
            Ok(redirect) => {
                say(&format!("Session ended: {}", redirect.reason));
                return Ok(ShellExit::Login);
            }
            Err(broadcast::error::TryRecvError::Lagged(_)) => return Ok(ShellExit::Login),
            Err(_) => {}
        }
    }
}

async fn fetch_one(gateway: &AuthGateway, label: String, path: &str) -> FetchResult {
    match gateway.get_json::<serde_json::Value>(path).await {
        Ok(value) => FetchResult::Fetched {
            label,
            summary: summarize(&value),
        },
        Err(e) => FetchResult::Failed {
            label,
            logged_out: e.is_auth_failure(),
            error: e.to_string(),
        },
    }
}

fn spawn_fetch(gateway: AuthGateway, path: String, tx: mpsc::Sender<FetchResult>) {
    tokio::spawn(async move {
        let result = fetch_one(&gateway, path.clone(), &path).await;
        send_result(&tx, result).await;
    });
}

fn spawn_burst(gateway: AuthGateway, path: String, tx: mpsc::Sender<FetchResult>) {
    tokio::spawn(async move {
        let calls = (0..BURST_SIZE).map(|i| fetch_one(&gateway, format!("#{} {}", i + 1, path), &path));
        for result in join_all(calls).await {
            send_result(&tx, result).await;
        }
        let refresh_calls = gateway.coordinator().network_calls();
        send_result(&tx, FetchResult::BurstDone { refresh_calls }).await;
    });
}

/// Helper to send fetch results, logging any channel errors
async fn send_result(tx: &mpsc::Sender<FetchResult>, result: FetchResult) {
    if tx.send(result).await.is_err() {
        error!("Failed to send fetch result - channel closed");
    }
}

/// One-line description of a JSON response.
fn summarize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Array(items) => format!("{} item(s)", items.len()),
        serde_json::Value::Object(map) => {
            let keys: Vec<&str> = map.keys().take(5).map(String::as_str).collect();
            format!("object with keys [{}]", keys.join(", "))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_summarize() {
        assert_eq!(summarize(&json!([1, 2, 3])), "3 item(s)");
        assert_eq!(summarize(&json!({"id": 1})), "object with keys [id]");
        assert_eq!(summarize(&json!(null)), "null");
    }
}
