//! Single-resolution cell shared by the event loop and the deadline timer.
//!
//! Both producers call [`CompletionLatch::try_resolve`]; the underlying
//! `OnceLock` accepts exactly one value, so the first caller wins and every
//! later call observes an already-terminal session and returns `false`.

use std::sync::OnceLock;

use tokio::sync::Notify;

use crate::pairing::resolver::OwnerIdentity;

/// Lifecycle of a pairing session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Listening,
    Completed,
    TimedOut,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, SessionStatus::Listening)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Listening => write!(f, "listening"),
            SessionStatus::Completed => write!(f, "completed"),
            SessionStatus::TimedOut => write!(f, "timed out"),
        }
    }
}

/// The matched sender and the chat the code arrived in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub chat_id: i64,
    pub owner: OwnerIdentity,
}

/// Terminal value written into the latch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Completed(Completion),
    TimedOut,
}

impl Resolution {
    pub fn status(&self) -> SessionStatus {
        match self {
            Resolution::Completed(_) => SessionStatus::Completed,
            Resolution::TimedOut => SessionStatus::TimedOut,
        }
    }
}

#[derive(Debug, Default)]
pub struct CompletionLatch {
    cell: OnceLock<Resolution>,
    resolved: Notify,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempt the terminal transition. Returns `true` only for the caller
    /// whose resolution was stored.
    pub fn try_resolve(&self, resolution: Resolution) -> bool {
        let won = self.cell.set(resolution).is_ok();
        if won {
            self.resolved.notify_waiters();
        }
        won
    }

    pub fn status(&self) -> SessionStatus {
        self.cell
            .get()
            .map_or(SessionStatus::Listening, Resolution::status)
    }

    pub fn resolution(&self) -> Option<&Resolution> {
        self.cell.get()
    }

    pub fn is_resolved(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Wait for the terminal transition.
    pub async fn wait(&self) -> &Resolution {
        loop {
            // Register before checking so a resolve in between is not missed.
            let notified = self.resolved.notified();
            if let Some(resolution) = self.cell.get() {
                return resolution;
            }
            notified.await;
        }
    }
}
