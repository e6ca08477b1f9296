//! Reacts to session events on behalf of the terminal user.

use std::path::PathBuf;

use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::{debug, info, warn};
use zinnia_client::{ApiClient, SessionEvent};

use crate::session_file::remove_session_file;

pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired, please log in again";

pub struct SessionSink {
    rx: broadcast::Receiver<SessionEvent>,
    session_path: Option<PathBuf>,
}

impl SessionSink {
    pub fn new(client: &ApiClient, session_path: Option<PathBuf>) -> Self {
        Self {
            rx: client.subscribe(),
            session_path,
        }
    }

    /// Handle every event published so far.
    pub fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(event) => self.handle(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    /// Wait for the next event; `None` once the client is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => {
                    self.handle(&event);
                    return Some(event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Missed session events");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    fn handle(&self, event: &SessionEvent) {
        if !event.is_invalidated() {
            debug!(event = %event.description(), "Session event");
            return;
        }

        info!(event = %event.description(), "Session invalidated");
        if let Some(path) = &self.session_path {
            if let Err(e) = remove_session_file(path) {
                warn!(path = %path.display(), error = %e, "Failed to remove session file");
            }
        }
        eprintln!("{SESSION_EXPIRED_MESSAGE}");
    }
}
