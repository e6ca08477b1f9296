//! Periodic background renewal.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::CredentialMode;
use crate::coordinator::{RenewalCoordinator, RenewalOutcome};
use crate::store::CredentialStore;

/// Handle to a running keepalive loop. Dropping it stops the loop.
#[derive(Debug)]
pub struct KeepaliveHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl KeepaliveHandle {
    /// Spawn a loop renewing through `coordinator` every `interval`.
    ///
    /// The first renewal happens one interval after spawning. The loop ends
    /// on the first failed renewal, on [`KeepaliveHandle::stop`], or when the
    /// coordinator shuts down.
    pub fn spawn(
        coordinator: RenewalCoordinator,
        store: Arc<dyn CredentialStore>,
        interval: Duration,
    ) -> Self {
        let token = coordinator.shutdown_token().child_token();
        let span = info_span!("keepalive", interval_ms = interval.as_millis() as u64);
        let task = tokio::spawn(run(coordinator, store, interval, token.clone()).instrument(span));
        Self { token, task }
    }

    pub fn stop(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for KeepaliveHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(
    coordinator: RenewalCoordinator,
    store: Arc<dyn CredentialStore>,
    interval: Duration,
    token: CancellationToken,
) {
    info!("Keepalive started");
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                debug!("Keepalive stopped");
                break;
            }
            _ = ticker.tick() => {
                if store.mode() == CredentialMode::Explicit && store.get().is_none() {
                    debug!("No session; skipping keepalive renewal");
                    continue;
                }
                match coordinator.renew_now().await {
                    RenewalOutcome::Renewed => debug!("Keepalive renewal succeeded"),
                    RenewalOutcome::Failed => {
                        warn!("Keepalive renewal failed; stopping");
                        break;
                    }
                    RenewalOutcome::Cancelled => break,
                }
            }
        }
    }
}
