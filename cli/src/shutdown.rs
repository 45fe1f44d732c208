//! What ends the process: termination signals, or the parent going away.
//!
//! Some hosts exit without killing the processes they spawned. Once that
//! happens we are re-parented (usually to init, pid 1), so the parent pid is
//! polled and a change involving pid 1 is treated like SIGTERM.

use std::fmt;
use std::time::Duration;

const PARENT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    Signal(&'static str),
    ParentExited { was: u32, now: u32 },
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(name) => write!(f, "received {name}"),
            Self::ParentExited { was, now } => {
                write!(f, "parent process {was} exited (now parented by {now})")
            }
        }
    }
}

/// Resolves on the first shutdown trigger.
pub async fn wait_for_trigger() -> Trigger {
    tokio::select! {
        name = termination_signal() => Trigger::Signal(name),
        trigger = watch_parent(PARENT_POLL_INTERVAL, parent_pid) => trigger,
    }
}

/// The parent pid moved and one side of the move is init.
pub fn is_orphaned(original: u32, current: u32) -> bool {
    current != original && (current == 1 || original == 1)
}

/// Poll `parent_pid` every `interval` until [`is_orphaned`] holds.
pub async fn watch_parent<F>(interval: Duration, mut parent_pid: F) -> Trigger
where
    F: FnMut() -> u32,
{
    let original = parent_pid();
    tracing::debug!(ppid = original, "Monitoring parent process");
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let current = parent_pid();
        if is_orphaned(original, current) {
            return Trigger::ParentExited {
                was: original,
                now: current,
            };
        }
    }
}

#[cfg(unix)]
fn parent_pid() -> u32 {
    std::os::unix::process::parent_id()
}

#[cfg(not(unix))]
fn parent_pid() -> u32 {
    0
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!(error = %e, "Cannot listen for SIGTERM");
            return interrupt().await;
        }
    };
    tokio::select! {
        name = interrupt() => name,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    interrupt().await
}

async fn interrupt() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Cannot listen for SIGINT");
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
