//! Autostart/autostop driven by the printer's job state.
//!
//! Edge-triggered: only a change between two polls causes an action. Entering
//! `printing` starts the session and cancels any pending stop; leaving it for
//! complete/error/standby arms a delayed stop that re-checks the state when it
//! fires. A start refused because a stop is still draining is retried on each
//! poll while the printer keeps printing.

use std::sync::Arc;
use std::time::Duration;

use printcast_core::types::PrintState;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::StreamerError;
use crate::session::{Orchestrator, StartOutcome};

/// Source of the printer's current job state.
#[async_trait::async_trait]
pub trait StatusSource: Send + Sync {
    /// True once the printer host can answer state queries.
    async fn is_ready(&self) -> bool;

    async fn print_state(&self) -> Result<PrintState, StreamerError>;
}

/// The session operations the controller drives.
#[async_trait::async_trait]
pub trait SessionControl: Send + Sync + 'static {
    async fn start_session(&self) -> StartOutcome;
    async fn stop_session(&self);
}

#[async_trait::async_trait]
impl SessionControl for Orchestrator {
    async fn start_session(&self) -> StartOutcome {
        let outcome = self.start().await;
        debug!(?outcome, "autostart");
        outcome
    }

    async fn stop_session(&self) {
        let outcome = self.stop().await;
        debug!(?outcome, "autostop");
    }
}

#[derive(Debug, Clone)]
pub struct AutoSettings {
    pub autostart: bool,
    pub autostop: bool,
    pub stop_delay: Duration,
    pub poll_interval: Duration,
    pub ready_interval: Duration,
}

impl Default for AutoSettings {
    fn default() -> Self {
        Self {
            autostart: true,
            autostop: true,
            stop_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(3),
            ready_interval: Duration::from_secs(1),
        }
    }
}

/// Polls a [`StatusSource`] and starts/stops the session on transitions.
pub struct PrintMonitor<S, C> {
    source: S,
    session: Arc<C>,
    settings: AutoSettings,
    state_tx: watch::Sender<PrintState>,
    last: Option<PrintState>,
    pending_stop: Option<CancellationToken>,
    retry_start: bool,
}

impl<S: StatusSource, C: SessionControl> PrintMonitor<S, C> {
    pub fn new(source: S, session: Arc<C>, settings: AutoSettings) -> Self {
        let (state_tx, _) = watch::channel(PrintState::Unknown);
        Self {
            source,
            session,
            settings,
            state_tx,
            last: None,
            pending_stop: None,
            retry_start: false,
        }
    }

    /// Receiver tracking the most recently observed state.
    pub fn subscribe(&self) -> watch::Receiver<PrintState> {
        self.state_tx.subscribe()
    }

    /// Run until `shutdown` is cancelled.
    pub async fn run(mut self, shutdown: CancellationToken) {
        if !self.wait_until_ready(&shutdown).await {
            return;
        }
        info!(
            autostart = self.settings.autostart,
            autostop = self.settings.autostop,
            stop_delay = ?self.settings.stop_delay,
            "print monitor running"
        );

        loop {
            let state = self.observe().await;
            if self.last != Some(state) {
                let old = self.last.replace(state);
                self.state_tx.send_replace(state);
                self.on_transition(old, state, &shutdown).await;
            } else if self.retry_start && state.is_printing() {
                self.request_start().await;
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.settings.poll_interval) => {}
            }
        }

        self.cancel_pending_stop();
        debug!("print monitor stopped");
    }

    async fn wait_until_ready(&self, shutdown: &CancellationToken) -> bool {
        loop {
            if self.source.is_ready().await {
                return true;
            }
            tokio::select! {
                _ = shutdown.cancelled() => return false,
                _ = tokio::time::sleep(self.settings.ready_interval) => {}
            }
        }
    }

    async fn observe(&self) -> PrintState {
        match self.source.print_state().await {
            Ok(state) => state,
            Err(e) => {
                debug!(error = %e, "print state query failed");
                PrintState::Unknown
            }
        }
    }

    async fn on_transition(&mut self, old: Option<PrintState>, new: PrintState, shutdown: &CancellationToken) {
        info!(
            from = old.map(PrintState::as_str).unwrap_or("none"),
            to = %new,
            "print state changed"
        );

        let was_printing = old.is_some_and(PrintState::is_printing);
        if new.is_printing() && !was_printing {
            self.cancel_pending_stop();
            if self.settings.autostart {
                self.request_start().await;
            }
        }
        if !new.is_printing() {
            self.retry_start = false;
        }

        if was_printing && new.ends_print() && self.settings.autostop {
            self.schedule_stop(shutdown);
        }
    }

    async fn request_start(&mut self) {
        let outcome = self.session.start_session().await;
        self.retry_start = outcome == StartOutcome::StopInProgress;
        if self.retry_start {
            info!("previous session still stopping, will retry start");
        }
    }

    fn schedule_stop(&mut self, shutdown: &CancellationToken) {
        self.cancel_pending_stop();

        let token = shutdown.child_token();
        let cancelled = token.clone();
        let session = Arc::clone(&self.session);
        let state_rx = self.state_tx.subscribe();
        let delay = self.settings.stop_delay;
        info!(?delay, "stop scheduled");

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancelled.cancelled() => {
                    debug!("scheduled stop cancelled");
                }
                _ = tokio::time::sleep(delay) => {
                    let current = *state_rx.borrow();
                    if current.is_printing() {
                        debug!("printing resumed, skipping scheduled stop");
                    } else {
                        session.stop_session().await;
                    }
                }
            }
        });
        self.pending_stop = Some(token);
    }

    fn cancel_pending_stop(&mut self) {
        if let Some(token) = self.pending_stop.take() {
            token.cancel();
        }
    }
}
