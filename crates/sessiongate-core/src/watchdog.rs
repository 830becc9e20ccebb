//! Inactivity watchdog.
//!
//! One tokio task owns one resettable timer. Each observed interaction pushes
//! the deadline out by the full window, but only while an access token exists.
//! When the deadline passes the session is cleared, the one-shot "session
//! expired" flag is set, and the login surface is requested.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, trace};

use crate::auth::{CredentialStore, LogoutReason, SessionSignals};

/// Default inactivity window: 30 minutes.
pub const DEFAULT_INACTIVITY_WINDOW: Duration = Duration::from_secs(30 * 60);

/// Interaction kinds the watchdog can observe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivitySignal {
    PointerMove,
    KeyPress,
    Scroll,
    Click,
}

impl ActivitySignal {
    pub const ALL: [ActivitySignal; 4] = [
        ActivitySignal::PointerMove,
        ActivitySignal::KeyPress,
        ActivitySignal::Scroll,
        ActivitySignal::Click,
    ];
}

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub window: Duration,
    pub signals: Vec<ActivitySignal>,
}

impl WatchdogConfig {
    pub fn with_window(window: Duration) -> Self {
        Self {
            window,
            ..Self::default()
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_INACTIVITY_WINDOW,
            signals: ActivitySignal::ALL.to_vec(),
        }
    }
}

enum Command {
    Activity(ActivitySignal),
    Rearm,
}

/// Handle to a running watchdog. Dropping it cancels the timer.
pub struct ActivityWatchdog {
    commands: mpsc::UnboundedSender<Command>,
    signals: Vec<ActivitySignal>,
    task: JoinHandle<()>,
}

impl ActivityWatchdog {
    /// Start watching and arm the timer right away (if a session exists).
    pub fn start(store: CredentialStore, signals: SessionSignals, config: WatchdogConfig) -> Self {
        let (commands, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(store, signals, config.window, rx));
        let watchdog = Self {
            commands,
            signals: config.signals,
            task,
        };
        watchdog.rearm();
        watchdog
    }

    /// Report a user interaction. Kinds outside the configured set are ignored.
    pub fn observe(&self, signal: ActivitySignal) {
        if !self.signals.contains(&signal) {
            trace!(?signal, "Ignoring unwatched activity");
            return;
        }
        let _ = self.commands.send(Command::Activity(signal));
    }

    /// The watched surface became active again (e.g. navigation within the protected area).
    pub fn rearm(&self) {
        let _ = self.commands.send(Command::Rearm);
    }

    /// Cancel the timer and stop listening.
    pub fn stop(self) {
        // Drop does the work.
    }
}

impl Drop for ActivityWatchdog {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn run(
    store: CredentialStore,
    signals: SessionSignals,
    window: Duration,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let timer = sleep_until(Instant::now() + window);
    tokio::pin!(timer);
    let mut armed = false;

    loop {
        tokio::select! {
            command = commands.recv() => {
                let Some(command) = command else { break };
                if !store.has_session() {
                    // No session: nothing to time out.
                    continue;
                }
                match command {
                    Command::Activity(signal) => trace!(?signal, "Activity"),
                    Command::Rearm => debug!("Watchdog rearmed"),
                }
                timer.as_mut().reset(Instant::now() + window);
                armed = true;
            }
            () = &mut timer, if armed => {
                armed = false;
                info!(window_secs = window.as_secs(), "Session expired after inactivity");
                store.clear();
                signals.mark_session_expired();
                signals.redirect_to_login(LogoutReason::Inactivity);
            }
        }
    }
    debug!("Watchdog stopped");
}
