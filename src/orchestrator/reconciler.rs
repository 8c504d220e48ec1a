//! Single funnel for candidate updates from both channels.

use crate::effect::{self, Effector};
use crate::error::SyncError;
use crate::model::{
    ChannelUpdate, Confidence, DetectionSession, EffectParameters, EmotionLabel, Origin,
    ParameterTable, RejectReason, SyncEvent, RESET_EFFECT,
};
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::watch;
use tracing::{debug, warn};

/// Outcome of [`StateReconciler::accept`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Applied,
    /// Committed to the session, but the label has no table entry so nothing was painted.
    Unmapped,
    Rejected(RejectReason),
}

/// Owns the detection session and the parameter table, and is the only path to the effector.
///
/// `enabled` is checked when an update is accepted rather than when it was requested, so a
/// response that resolves after teardown cannot bring presentation state back.
pub(crate) struct StateReconciler {
    session: DetectionSession,
    table: ParameterTable,
    effector: Box<dyn Effector>,
    session_tx: watch::Sender<DetectionSession>,
    table_tx: watch::Sender<ParameterTable>,
    events: UnboundedSender<SyncEvent>,
}

impl StateReconciler {
    pub(crate) fn new(
        table: ParameterTable,
        effector: Box<dyn Effector>,
        session_tx: watch::Sender<DetectionSession>,
        table_tx: watch::Sender<ParameterTable>,
        events: UnboundedSender<SyncEvent>,
    ) -> Self {
        let session = DetectionSession::default();
        session_tx.send_replace(session);
        table_tx.send_replace(table.clone());
        Self {
            session,
            table,
            effector,
            session_tx,
            table_tx,
            events,
        }
    }

    pub(crate) fn session(&self) -> DetectionSession {
        self.session
    }

    pub(crate) fn activate(&mut self) {
        self.session.enabled = true;
        self.publish();
    }

    /// Disable the session, reset it to neutral and paint the reset effect directly.
    pub(crate) fn deactivate(&mut self) {
        self.session = DetectionSession::default();
        self.publish();
        self.effector.apply_params(&RESET_EFFECT);
        let _ = self.events.send(SyncEvent::Reset);
    }

    /// Filter a candidate update and, when valid, commit it and drive the effector.
    ///
    /// Repeats of the current label are not deduplicated: confidence moves frame to frame
    /// and every accepted update re-triggers the effector.
    pub(crate) fn accept(&mut self, origin: Origin, update: ChannelUpdate) -> Verdict {
        if !self.session.enabled {
            debug!(?origin, label = %update.label, "rejecting update: session disabled");
            return self.reject(origin, RejectReason::Disabled);
        }
        if update.label.is_none() {
            return self.reject(origin, RejectReason::NoDetection);
        }

        self.commit(update.label, update.confidence);
        let _ = self.events.send(SyncEvent::Accepted {
            origin,
            label: update.label,
            confidence: update.confidence,
        });

        match effect::map(update.label, &self.table) {
            Some(params) => {
                self.effector.apply_params(&params);
                Verdict::Applied
            }
            None => {
                let err = SyncError::MappingMissing(update.label);
                warn!(code = err.code(), "{err}");
                let _ = self.events.send(SyncEvent::MappingMissing {
                    label: update.label,
                });
                Verdict::Unmapped
            }
        }
    }

    /// Record a payload that could not be decoded. Nothing is committed.
    pub(crate) fn reject_malformed(&mut self, origin: Origin) -> Verdict {
        self.reject(origin, RejectReason::Malformed)
    }

    /// Replace one table entry. When it belongs to the current label the new effect is
    /// painted immediately instead of waiting for the next detection event.
    pub(crate) fn update_mapping(
        &mut self,
        label: EmotionLabel,
        params: EffectParameters,
    ) -> Result<bool, SyncError> {
        self.table.set(label, params)?;
        self.table_tx.send_replace(self.table.clone());
        let _ = self.events.send(SyncEvent::MappingUpdated { label, params });

        let live = label == self.session.label;
        if live {
            self.effector.apply_params(&params);
        }
        Ok(live)
    }

    fn commit(&mut self, label: EmotionLabel, confidence: Confidence) {
        self.session.label = label;
        self.session.confidence = confidence;
        self.publish();
    }

    fn reject(&mut self, origin: Origin, reason: RejectReason) -> Verdict {
        let _ = self.events.send(SyncEvent::Rejected { origin, reason });
        Verdict::Rejected(reason)
    }

    fn publish(&self) {
        self.session_tx.send_replace(self.session);
    }
}
