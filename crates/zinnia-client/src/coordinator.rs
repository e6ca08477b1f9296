//! Single-flight credential renewal.
//!
//! # State machine
//!
//! - `Idle`: no renewal in flight. The first caller asking for renewal
//!   becomes the leader: the state flips to `Renewing` and a renewal task is
//!   spawned.
//! - `Renewing`: callers are queued behind the in-flight renewal and receive
//!   its outcome.
//!
//! When the renewal finishes, the flip back to `Idle` and the hand-over of
//! the whole queue happen in one critical section, so no caller can be
//! classified against a half-updated state. Outcomes are then delivered in
//! FIFO order (the leader is always first in the queue).
//!
//! Every completed renewal closes a *cycle*. Callers pass the cycle they
//! observed before sending their request; a 401 caused by a credential that a
//! later cycle has already replaced (or torn down) joins that cycle's outcome
//! instead of starting another renewal.
//!
//! # Sessions
//!
//! Login and logout go through [`RenewalCoordinator::begin_session`] and
//! [`RenewalCoordinator::end_session`], which bump a session generation. A
//! renewal only installs its credential, or tears the session down, if the
//! generation it started under is still current.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::RenewalError;
use crate::events::{InvalidationReason, SessionEvent, SessionEvents};
use crate::renewal::Renewer;
use crate::store::{CredentialStore, Credentials};

/// Result of a renewal cycle as seen by a waiting caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenewalOutcome {
    /// A fresh credential is in place; replay the request.
    Renewed,
    /// Renewal failed; the session has been torn down.
    Failed,
    /// The coordinator shut down before the renewal finished.
    Cancelled,
}

/// How a caller got attached to a renewal cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TicketRole {
    /// Started the renewal.
    Leader,
    /// Queued behind an in-flight renewal.
    Follower,
    /// Arrived after the relevant cycle had already completed.
    Joined,
}

/// A caller's claim on the outcome of one renewal cycle.
#[derive(Debug)]
pub struct RenewalTicket {
    role: TicketRole,
    cycle: u64,
    receiver: oneshot::Receiver<RenewalOutcome>,
}

impl RenewalTicket {
    pub fn role(&self) -> TicketRole {
        self.role
    }

    /// Cycle whose outcome this ticket resolves to.
    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub async fn outcome(self) -> RenewalOutcome {
        // A dropped sender means the renewal task itself was torn down.
        self.receiver.await.unwrap_or(RenewalOutcome::Cancelled)
    }
}

enum Phase {
    Idle,
    Renewing {
        waiters: VecDeque<oneshot::Sender<RenewalOutcome>>,
    },
}

struct RenewalState {
    phase: Phase,
    /// Number of completed cycles.
    completed: u64,
    last_outcome: Option<RenewalOutcome>,
    /// Highest cycle whose invalidation has been published.
    invalidated: u64,
    /// Bumped by every login and logout.
    session: u64,
    /// False after logout.
    signed_in: bool,
    /// Session generation the last completed cycle started under.
    completed_session: u64,
}

impl RenewalState {
    /// Record that `cycle` tore the session down; false if already done.
    fn mark_invalidated(&mut self, cycle: u64) -> bool {
        if self.invalidated >= cycle {
            return false;
        }
        self.invalidated = cycle;
        true
    }
}

struct Inner {
    state: Mutex<RenewalState>,
    renewer: Arc<dyn Renewer>,
    store: Arc<dyn CredentialStore>,
    events: SessionEvents,
    shutdown: CancellationToken,
    renewals_started: AtomicU64,
}

/// Ensures at most one renewal is in flight and fans its outcome out.
#[derive(Clone)]
pub struct RenewalCoordinator {
    inner: Arc<Inner>,
}

impl RenewalCoordinator {
    pub fn new(
        renewer: Arc<dyn Renewer>,
        store: Arc<dyn CredentialStore>,
        events: SessionEvents,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(RenewalState {
                    phase: Phase::Idle,
                    completed: 0,
                    last_outcome: None,
                    invalidated: 0,
                    session: 0,
                    signed_in: true,
                    completed_session: 0,
                }),
                renewer,
                store,
                events,
                shutdown: CancellationToken::new(),
                renewals_started: AtomicU64::new(0),
            }),
        }
    }

    /// Number of completed renewal cycles.
    pub fn current_cycle(&self) -> u64 {
        self.inner.state.lock().completed
    }

    pub fn is_renewing(&self) -> bool {
        matches!(self.inner.state.lock().phase, Phase::Renewing { .. })
    }

    /// Callers currently waiting on the in-flight renewal, leader included.
    pub fn pending_waiters(&self) -> usize {
        match &self.inner.state.lock().phase {
            Phase::Renewing { waiters } => waiters.len(),
            Phase::Idle => 0,
        }
    }

    /// Total renewal procedure invocations.
    pub fn renewals_started(&self) -> u64 {
        self.inner.renewals_started.load(Ordering::SeqCst)
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled by [`RenewalCoordinator::shutdown`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    /// Ask for a renewal on behalf of a request sent during cycle `observed`.
    ///
    /// Must be called from within a tokio runtime: the leader spawns the
    /// renewal task so that dropping the leader's future cannot strand the
    /// followers.
    pub fn request_renewal(&self, observed: u64) -> RenewalTicket {
        let (tx, receiver) = oneshot::channel();
        let mut guard = self.inner.state.lock();
        let state = &mut *guard;

        if let Phase::Renewing { waiters } = &mut state.phase {
            waiters.push_back(tx);
            debug!(
                position = waiters.len(),
                "Renewal in flight; queued behind it"
            );
            return RenewalTicket {
                role: TicketRole::Follower,
                cycle: state.completed + 1,
                receiver,
            };
        }

        if state.completed > observed {
            if let Some(outcome) = state.last_outcome {
                debug!(
                    observed,
                    completed = state.completed,
                    ?outcome,
                    "Credential already replaced by a later cycle"
                );
                let _ = tx.send(outcome);
                return RenewalTicket {
                    role: TicketRole::Joined,
                    cycle: state.completed,
                    receiver,
                };
            }
        }

        if self.inner.shutdown.is_cancelled() {
            let _ = tx.send(RenewalOutcome::Cancelled);
            return RenewalTicket {
                role: TicketRole::Joined,
                cycle: state.completed,
                receiver,
            };
        }

        let cycle = state.completed + 1;
        let session = state.session;
        state.phase = Phase::Renewing {
            waiters: VecDeque::from([tx]),
        };
        drop(guard);

        self.spawn_renewal(cycle, session);
        RenewalTicket {
            role: TicketRole::Leader,
            cycle,
            receiver,
        }
    }

    /// Renew now regardless of what the caller last observed (keepalive, manual refresh).
    pub async fn renew_now(&self) -> RenewalOutcome {
        let observed = self.current_cycle();
        self.request_renewal(observed).outcome().await
    }

    /// Install the credentials of a fresh login (`None` in ambient mode).
    ///
    /// A renewal still in flight from the previous session is discarded when
    /// it completes.
    pub fn begin_session(&self, credentials: Option<Credentials>) {
        let mut state = self.inner.state.lock();
        state.session += 1;
        state.signed_in = true;
        if let Some(credentials) = credentials {
            self.inner.store.set(credentials);
        }
        debug!(session = state.session, "Session started");
    }

    /// Clear the local session. An in-flight renewal can no longer restore it.
    pub fn end_session(&self) {
        let mut state = self.inner.state.lock();
        state.session += 1;
        state.signed_in = false;
        self.inner.store.clear();
        debug!(session = state.session, "Session ended");
    }

    /// Tear the session down because the credential from `cycle` was rejected.
    ///
    /// Ignored when a newer cycle has completed or started since, or when
    /// the session was replaced after `cycle` completed.
    pub fn reject_renewed(&self, cycle: u64) {
        let mut state = self.inner.state.lock();
        let current = state.completed == cycle
            && matches!(state.phase, Phase::Idle)
            && state.completed_session == state.session;

        if current && state.mark_invalidated(cycle) {
            warn!(cycle, "Renewed credential rejected; tearing session down");
            self.tear_down(cycle, InvalidationReason::RejectedAfterRenewal);
        }
    }

    /// Cancel any in-flight renewal; later requests get `Cancelled`.
    pub fn shutdown(&self) {
        if !self.inner.shutdown.is_cancelled() {
            info!("Renewal coordinator shutting down");
            self.inner.shutdown.cancel();
        }
    }

    fn spawn_renewal(&self, cycle: u64, session: u64) {
        let this = self.clone();
        let span = info_span!("credential_renewal", cycle);
        tokio::spawn(async move { this.supervise_renewal(cycle, session).await }.instrument(span));
    }

    /// Run the renewer in its own task and settle the cycle however it ends.
    ///
    /// A panicking renewer counts as a failed renewal; the waiters are
    /// always released.
    async fn supervise_renewal(&self, cycle: u64, session: u64) {
        self.inner.renewals_started.fetch_add(1, Ordering::SeqCst);
        info!("Starting credential renewal");

        let renewer = self.inner.renewer.clone();
        let mut task = tokio::spawn(async move { renewer.renew().await }.in_current_span());

        let result = tokio::select! {
            _ = self.inner.shutdown.cancelled() => {
                task.abort();
                None
            }
            joined = &mut task => match joined {
                Ok(result) => Some(result),
                Err(e) if e.is_panic() => {
                    error!("Credential renewal task panicked");
                    Some(Err(RenewalError::Aborted {
                        reason: "renewal task panicked".to_owned(),
                    }))
                }
                Err(_) => None,
            },
        };

        self.settle(cycle, session, result);
    }

    /// Close `cycle` and deliver its outcome to every waiter in FIFO order.
    fn settle(
        &self,
        cycle: u64,
        session: u64,
        result: Option<Result<Option<Credentials>, RenewalError>>,
    ) {
        let (outcome, waiters, renewed) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            let superseded = state.session != session;

            let outcome = match result {
                None => {
                    warn!("Credential renewal cancelled by shutdown");
                    RenewalOutcome::Cancelled
                }
                Some(_) if superseded => {
                    info!(
                        signed_in = state.signed_in,
                        "Session replaced during renewal; discarding result"
                    );
                    if state.signed_in {
                        RenewalOutcome::Renewed
                    } else {
                        RenewalOutcome::Failed
                    }
                }
                Some(Ok(credentials)) => {
                    info!("Credential renewal successful");
                    if let Some(credentials) = credentials {
                        self.inner.store.set(credentials);
                    }
                    RenewalOutcome::Renewed
                }
                Some(Err(e)) => {
                    error!(
                        error = %e,
                        requires_relogin = e.requires_relogin(),
                        "Credential renewal failed"
                    );
                    // Before delivery, so every waiter sees the cleared store.
                    if state.mark_invalidated(cycle) {
                        self.tear_down(
                            cycle,
                            InvalidationReason::RenewalFailed {
                                error: e.to_string(),
                            },
                        );
                    }
                    RenewalOutcome::Failed
                }
            };

            let waiters = match std::mem::replace(&mut state.phase, Phase::Idle) {
                Phase::Renewing { waiters } => waiters,
                Phase::Idle => VecDeque::new(),
            };
            if outcome != RenewalOutcome::Cancelled {
                state.completed = cycle;
                state.last_outcome = Some(outcome);
                state.completed_session = session;
            }
            let renewed = outcome == RenewalOutcome::Renewed && !superseded;
            (outcome, waiters, renewed)
        };

        if renewed {
            self.inner.events.publish(SessionEvent::Renewed { cycle });
        }

        let total = waiters.len();
        let mut abandoned = 0usize;
        for waiter in waiters {
            if waiter.send(outcome).is_err() {
                abandoned += 1;
            }
        }
        debug!(total, abandoned, ?outcome, "Renewal outcome delivered");
    }

    /// Call with the state lock held.
    fn tear_down(&self, cycle: u64, reason: InvalidationReason) {
        self.inner.store.clear();
        self.inner
            .events
            .publish(SessionEvent::Invalidated { cycle, reason });
    }
}

impl std::fmt::Debug for RenewalCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RenewalCoordinator")
            .field("renewing", &matches!(state.phase, Phase::Renewing { .. }))
            .field("completed", &state.completed)
            .field("last_outcome", &state.last_outcome)
            .finish()
    }
}
