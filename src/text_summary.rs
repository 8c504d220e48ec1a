//! Session summary for text mode.
//!
//! Tallies sync events as they stream past and formats human-readable lines at exit.

use crate::metrics;
use crate::model::{EmotionLabel, Origin, SyncEvent};
use std::collections::BTreeMap;

/// Running counts collected from the event stream.
#[derive(Debug, Default)]
pub(crate) struct SessionTally {
    pub accepted_push: u64,
    pub accepted_pull: u64,
    pub rejected: u64,
    pub unmapped: u64,
    pub applied: u64,
    pub channel_transitions: u64,
    pub confidences: BTreeMap<EmotionLabel, Vec<f64>>,
}

impl SessionTally {
    pub(crate) fn record(&mut self, ev: &SyncEvent) {
        match ev {
            SyncEvent::Accepted {
                origin,
                label,
                confidence,
            } => {
                match origin {
                    Origin::Push => self.accepted_push += 1,
                    Origin::Pull => self.accepted_pull += 1,
                }
                self.confidences
                    .entry(*label)
                    .or_default()
                    .push(confidence.value());
            }
            SyncEvent::Rejected { .. } => self.rejected += 1,
            SyncEvent::MappingMissing { .. } => self.unmapped += 1,
            SyncEvent::Applied { .. } => self.applied += 1,
            SyncEvent::ChannelState { .. } => self.channel_transitions += 1,
            SyncEvent::MappingUpdated { .. } | SyncEvent::Reset | SyncEvent::Info { .. } => {}
        }
    }
}

/// Pre-formatted lines for text output.
pub(crate) struct TextSummary {
    pub lines: Vec<String>,
}

pub(crate) fn build_text_summary(tally: &SessionTally) -> TextSummary {
    let mut lines = Vec::new();
    lines.push(format!(
        "Updates: {} accepted (push {}, pull {}), {} rejected, {} without mapping",
        tally.accepted_push + tally.accepted_pull,
        tally.accepted_push,
        tally.accepted_pull,
        tally.rejected,
        tally.unmapped
    ));
    lines.push(format!(
        "Surface updates: {}   Channel transitions: {}",
        tally.applied, tally.channel_transitions
    ));

    for (label, samples) in &tally.confidences {
        if let Some((mean, median, p25, p75)) = metrics::compute_metrics(samples) {
            lines.push(format!(
                "{:<9} n={:<5} confidence avg {:.1} med {:.1} p25 {:.1} p75 {:.1}",
                label.as_str(),
                samples.len(),
                mean,
                median,
                p25,
                p75
            ));
        }
    }
    if tally.confidences.is_empty() {
        lines.push("No emotions detected".into());
    }

    TextSummary { lines }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, RejectReason};

    fn accepted(origin: Origin, label: EmotionLabel, confidence: f64) -> SyncEvent {
        SyncEvent::Accepted {
            origin,
            label,
            confidence: Confidence::new(confidence).unwrap(),
        }
    }

    #[test]
    fn summary_counts_per_origin_and_label() {
        let mut tally = SessionTally::default();
        tally.record(&accepted(Origin::Push, EmotionLabel::Happy, 80.0));
        tally.record(&accepted(Origin::Pull, EmotionLabel::Happy, 90.0));
        tally.record(&accepted(Origin::Push, EmotionLabel::Sad, 61.0));
        tally.record(&SyncEvent::Rejected {
            origin: Origin::Pull,
            reason: RejectReason::Disabled,
        });

        let summary = build_text_summary(&tally);
        assert_eq!(
            summary.lines[0],
            "Updates: 3 accepted (push 2, pull 1), 1 rejected, 0 without mapping"
        );
        assert!(summary.lines.iter().any(|l| l.starts_with("happy") && l.contains("n=2")));
        assert!(summary.lines.iter().any(|l| l.starts_with("sad") && l.contains("avg 61.0")));
    }

    #[test]
    fn empty_session_says_so() {
        let summary = build_text_summary(&SessionTally::default());
        assert_eq!(summary.lines.last().unwrap(), "No emotions detected");
    }
}
