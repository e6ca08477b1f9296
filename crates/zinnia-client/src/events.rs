//! Session lifecycle events.
//!
//! `Invalidated` is the signal a session invalidation sink (e.g. a UI that
//! navigates to its login screen) subscribes to. It is published at most once
//! per renewal cycle and only after a renewal actually failed or the renewed
//! credential was rejected.

use tokio::sync::broadcast;

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    /// The renewal procedure failed.
    RenewalFailed { error: String },
    /// The server rejected a request again right after a successful renewal.
    RejectedAfterRenewal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user_id: String },
    /// Renewal cycle `cycle` produced a fresh credential.
    Renewed { cycle: u64 },
    /// Terminal: the session is gone and the user has to log in again.
    Invalidated {
        cycle: u64,
        reason: InvalidationReason,
    },
    LoggedOut,
}

impl SessionEvent {
    /// Get a description of the event for logging.
    pub fn description(&self) -> String {
        match self {
            Self::LoggedIn { user_id } => format!("Logged in as {}", user_id),
            Self::Renewed { cycle } => format!("Session renewed (cycle {})", cycle),
            Self::Invalidated { cycle, reason } => match reason {
                InvalidationReason::RenewalFailed { error } => {
                    format!("Session invalidated in cycle {}: {}", cycle, error)
                }
                InvalidationReason::RejectedAfterRenewal => format!(
                    "Session invalidated in cycle {}: renewed credential rejected",
                    cycle
                ),
            },
            Self::LoggedOut => "Logged out".to_string(),
        }
    }

    #[inline]
    pub fn is_invalidated(&self) -> bool {
        matches!(self, Self::Invalidated { .. })
    }
}

/// Broadcast hub for [`SessionEvent`]s.
#[derive(Debug, Clone)]
pub struct SessionEvents {
    tx: broadcast::Sender<SessionEvent>,
}

impl SessionEvents {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; returns the number of subscribers that received it.
    pub fn publish(&self, event: SessionEvent) -> usize {
        // Err just means no subscribers right now.
        self.tx.send(event).unwrap_or(0)
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SessionEvents {
    fn default() -> Self {
        Self::new(64)
    }
}
