//! Channel supervisor.
//!
//! Owns both channels, the fallback timer and the reconciler, and runs them on a single
//! event loop: commands from front ends and tagged channel events are handled one at a
//! time, in arrival order. While a session is enabled the push channel and the pull
//! channel run side by side; polling is not switched off when push opens, so a push
//! connection that stalls without erroring never leaves the surface stale.

use super::reconciler::{StateReconciler, Verdict};
use crate::effect::Effector;
use crate::engine::{ChannelEvent, DetectionBackend, PullChannel, PushChannel, PushConnector, PushEvent};
use crate::error::SyncError;
use crate::model::{
    ChannelState, DetectionSession, EffectParameters, EmotionLabel, Origin, ParameterTable,
    PushPayload, SyncConfig, SyncEvent,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Commands accepted by the supervisor loop.
#[derive(Debug)]
pub(crate) enum SessionCommand {
    SetEnabled {
        enabled: bool,
        done: oneshot::Sender<()>,
    },
    UpdateMapping {
        label: EmotionLabel,
        params: EffectParameters,
        done: oneshot::Sender<Result<(), SyncError>>,
    },
    Shutdown,
}

/// One-shot timer reporting whether push reached `Open` in time. Cancelled on drop.
struct FallbackTimer(JoinHandle<()>);

impl FallbackTimer {
    fn arm(after: Duration, epoch: u64, events: UnboundedSender<ChannelEvent>) -> Self {
        Self(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = events.send(ChannelEvent::FallbackElapsed { epoch });
        }))
    }
}

impl Drop for FallbackTimer {
    fn drop(&mut self) {
        self.0.abort();
    }
}

pub(crate) struct ChannelSupervisor {
    fallback_after: Duration,
    connector: Arc<dyn PushConnector>,
    channel_tx: UnboundedSender<ChannelEvent>,
    epoch: u64,
    push: Option<PushChannel>,
    pull: PullChannel,
    fallback: Option<FallbackTimer>,
    push_state: ChannelState,
    status_tx: watch::Sender<ChannelState>,
    events: UnboundedSender<SyncEvent>,
    reconciler: StateReconciler,
}

impl ChannelSupervisor {
    fn set_enabled(&mut self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.teardown();
        }
    }

    fn enable(&mut self) {
        if self.reconciler.session().enabled {
            debug!("session already enabled");
            return;
        }
        self.epoch += 1;
        info!(epoch = self.epoch, "enabling session");
        self.reconciler.activate();
        self.set_push_state(ChannelState::Connecting);
        self.push = Some(PushChannel::open(
            self.connector.as_ref(),
            self.epoch,
            self.channel_tx.clone(),
        ));
        self.pull.start(self.epoch);
        self.fallback = Some(FallbackTimer::arm(
            self.fallback_after,
            self.epoch,
            self.channel_tx.clone(),
        ));
    }

    /// Release every channel and timer. Safe to call any number of times.
    fn teardown(&mut self) {
        let was_enabled = self.reconciler.session().enabled;
        if let Some(push) = self.push.take() {
            push.close();
        }
        self.pull.stop();
        self.fallback = None;
        self.set_push_state(ChannelState::Idle);
        if was_enabled {
            info!(epoch = self.epoch, "session disabled");
            self.reconciler.deactivate();
        }
    }

    fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SetEnabled { enabled, done } => {
                self.set_enabled(enabled);
                let _ = done.send(());
            }
            SessionCommand::UpdateMapping {
                label,
                params,
                done,
            } => {
                let res = self.reconciler.update_mapping(label, params).map(|live| {
                    debug!(%label, live, "mapping updated");
                });
                let _ = done.send(res);
            }
            SessionCommand::Shutdown => self.teardown(),
        }
    }

    fn handle_channel_event(&mut self, ev: ChannelEvent) {
        if ev.epoch() != self.epoch {
            debug!(stale = ev.epoch(), current = self.epoch, "dropping event from an earlier session");
            return;
        }
        match ev {
            ChannelEvent::Push { event, .. } => self.on_push(event),
            ChannelEvent::Polled { update, .. } => {
                self.reconciler.accept(Origin::Pull, update);
            }
            ChannelEvent::FallbackElapsed { .. } => {
                self.fallback = None;
                if self.reconciler.session().enabled && self.push_state != ChannelState::Open {
                    info!(
                        state = ?self.push_state,
                        "push channel not open after {:?}; pull channel carries updates",
                        self.fallback_after
                    );
                    let _ = self.events.send(SyncEvent::info(
                        "Push channel not open yet; relying on polling",
                    ));
                }
            }
        }
    }

    fn on_push(&mut self, event: PushEvent) {
        let enabled = self.reconciler.session().enabled;
        match event {
            // Messages do not restart the poller; it stays on its own fixed cadence.
            PushEvent::Message(raw) => match PushPayload::decode(&raw) {
                Ok(update) => match self.reconciler.accept(Origin::Push, update) {
                    Verdict::Applied => debug!(label = %update.label, "push update applied"),
                    Verdict::Unmapped => {}
                    Verdict::Rejected(reason) => debug!(?reason, "push update rejected"),
                },
                Err(e) => {
                    warn!(code = e.code(), "dropping push frame: {e}");
                    self.reconciler.reject_malformed(Origin::Push);
                }
            },
            // Lifecycle transitions only matter while the session that opened them is live.
            _ if !enabled => debug!(?event, "ignoring push lifecycle event after teardown"),
            PushEvent::Opened => {
                self.set_push_state(ChannelState::Open);
                // Restarting keeps exactly one poller; polling continues alongside push.
                self.pull.start(self.epoch);
            }
            PushEvent::Errored(reason) => {
                warn!("push channel errored: {reason}; not retrying this session");
                self.push = None;
                self.set_push_state(ChannelState::Errored);
                self.pull.start(self.epoch);
            }
            PushEvent::Closed => {
                self.push = None;
                self.set_push_state(ChannelState::Closed);
            }
        }
    }

    fn set_push_state(&mut self, state: ChannelState) {
        if self.push_state == state {
            return;
        }
        info!(from = ?self.push_state, to = ?state, "push channel state");
        self.push_state = state;
        self.status_tx.send_replace(state);
        let _ = self.events.send(SyncEvent::ChannelState { state });
    }

    async fn run(
        mut self,
        mut cmd_rx: UnboundedReceiver<SessionCommand>,
        mut channel_rx: UnboundedReceiver<ChannelEvent>,
    ) {
        loop {
            tokio::select! {
                // Commands first: a disable that is already queued wins over channel events
                // queued behind it.
                biased;
                cmd = cmd_rx.recv() => match cmd {
                    Some(SessionCommand::Shutdown) | None => {
                        self.teardown();
                        break;
                    }
                    Some(cmd) => self.handle_command(cmd),
                },
                Some(ev) = channel_rx.recv() => self.handle_channel_event(ev),
            }
        }
        debug!("supervisor loop finished");
    }

    #[cfg(test)]
    fn live_handles(&self) -> (usize, usize, usize) {
        (
            usize::from(self.push.is_some()),
            usize::from(self.pull.is_running()),
            usize::from(self.fallback.is_some()),
        )
    }
}

/// Collaborators the supervisor is wired to.
pub(crate) struct SupervisorParts {
    pub backend: Arc<dyn DetectionBackend>,
    pub connector: Arc<dyn PushConnector>,
    pub effector: Box<dyn Effector>,
    pub table: ParameterTable,
    pub events: UnboundedSender<SyncEvent>,
}

/// Front-end handle onto a running supervisor.
///
/// Dropping the last handle tears the session down exactly like `set_enabled(false)`,
/// minus the stop request to the backend.
#[derive(Clone)]
pub struct SyncHandle {
    cmd_tx: UnboundedSender<SessionCommand>,
    backend: Arc<dyn DetectionBackend>,
    session_rx: watch::Receiver<DetectionSession>,
    table_rx: watch::Receiver<ParameterTable>,
    status_rx: watch::Receiver<ChannelState>,
}

impl SyncHandle {
    /// Current `{label, confidence, enabled}`.
    pub fn current_state(&self) -> DetectionSession {
        *self.session_rx.borrow()
    }

    pub fn mappings(&self) -> ParameterTable {
        self.table_rx.borrow().clone()
    }

    /// Read-only push channel status for display.
    pub fn connection_status(&self) -> watch::Receiver<ChannelState> {
        self.status_rx.clone()
    }

    /// Ask the backend to start or stop detection, then enable or disable the session.
    /// If the backend refuses, nothing changes locally.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), SyncError> {
        let current = self.current_state().enabled;
        if enabled && !current {
            self.backend.start_detection().await?;
        } else if !enabled && current {
            self.backend.stop_detection().await?;
        }
        let (done, committed) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::SetEnabled { enabled, done })
            .map_err(|_| SyncError::Closed)?;
        committed.await.map_err(|_| SyncError::Closed)
    }

    /// Replace one mapping locally, then persist it on the backend. A persistence failure
    /// is reported but the local edit stays in effect.
    pub async fn update_mapping(
        &self,
        label: EmotionLabel,
        params: EffectParameters,
    ) -> Result<(), SyncError> {
        let (done, committed) = oneshot::channel();
        self.cmd_tx
            .send(SessionCommand::UpdateMapping {
                label,
                params,
                done,
            })
            .map_err(|_| SyncError::Closed)?;
        committed.await.map_err(|_| SyncError::Closed)??;

        self.backend.put_mapping(label, params).await.inspect_err(|e| {
            warn!(code = e.code(), %label, "mapping kept locally, backend update failed: {e}");
        })
    }

    /// Tear down without contacting the backend and stop the supervisor loop.
    pub fn shutdown(&self) {
        let _ = self.cmd_tx.send(SessionCommand::Shutdown);
    }
}

/// Spawn the supervisor loop and return a handle onto it.
pub(crate) fn spawn_supervisor(cfg: &SyncConfig, parts: SupervisorParts) -> (SyncHandle, JoinHandle<()>) {
    let (supervisor, handle, cmd_rx, channel_rx) = build(cfg, parts);
    let task = tokio::spawn(supervisor.run(cmd_rx, channel_rx));
    (handle, task)
}

fn build(
    cfg: &SyncConfig,
    parts: SupervisorParts,
) -> (
    ChannelSupervisor,
    SyncHandle,
    UnboundedReceiver<SessionCommand>,
    UnboundedReceiver<ChannelEvent>,
) {
    let SupervisorParts {
        backend,
        connector,
        effector,
        table,
        events,
    } = parts;
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
    let (channel_tx, channel_rx) = mpsc::unbounded_channel();
    let (session_tx, session_rx) = watch::channel(DetectionSession::default());
    let (table_tx, table_rx) = watch::channel(table.clone());
    let (status_tx, status_rx) = watch::channel(ChannelState::Idle);

    let reconciler = StateReconciler::new(table, effector, session_tx, table_tx, events.clone());
    let supervisor = ChannelSupervisor {
        fallback_after: cfg.fallback_after,
        connector,
        pull: PullChannel::new(backend.clone(), cfg.poll_interval, channel_tx.clone()),
        channel_tx,
        epoch: 0,
        push: None,
        fallback: None,
        push_state: ChannelState::Idle,
        status_tx,
        events,
        reconciler,
    };
    let handle = SyncHandle {
        cmd_tx,
        backend,
        session_rx,
        table_rx,
        status_rx,
    };
    (supervisor, handle, cmd_rx, channel_rx)
}
