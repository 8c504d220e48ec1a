//! Front-end command controller.
//!
//! Turns UI intents (toggle detection, nudge the active mapping, save, quit) into calls on
//! the [`SyncHandle`] and reports outcomes back as [`SyncEvent::Info`] messages.

use super::supervisor::SyncHandle;
use crate::model::{EffectParameters, SyncEvent};
use crate::storage;
use anyhow::Result;
use std::path::PathBuf;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::Duration;
use tracing::warn;

/// Commands emitted by UI layers.
#[derive(Debug, Clone)]
pub(crate) enum UiCommand {
    ToggleDetection,
    /// Brightness delta (percentage points) for the active label.
    AdjustBrightness(i16),
    /// Transition delta in seconds for the active label.
    AdjustTransition(f64),
    SaveMappings,
    Quit,
}

const MIN_TRANSITION_SECS: f64 = 0.1;

/// Apply a UI nudge to one mapping, keeping it inside the valid ranges.
pub(crate) fn nudge(params: EffectParameters, cmd: &UiCommand) -> EffectParameters {
    let mut next = params;
    match cmd {
        UiCommand::AdjustBrightness(delta) => {
            next.brightness = (i16::from(params.brightness) + delta).clamp(0, 100) as u8;
        }
        UiCommand::AdjustTransition(delta) => {
            let secs = ((params.transition_seconds + delta) * 10.0).round() / 10.0;
            next.transition_seconds = secs.max(MIN_TRANSITION_SECS);
        }
        _ => {}
    }
    next
}

/// Drive the sync session from UI commands until quit (or the UI goes away).
pub(crate) async fn run_controller(
    handle: SyncHandle,
    mappings_path: Option<PathBuf>,
    event_tx: UnboundedSender<SyncEvent>,
    mut cmd_rx: UnboundedReceiver<UiCommand>,
) -> Result<()> {
    let info = |msg: String| {
        let _ = event_tx.send(SyncEvent::info(msg));
    };

    while let Some(cmd) = cmd_rx.recv().await {
        match cmd {
            UiCommand::ToggleDetection => {
                let enable = !handle.current_state().enabled;
                let verb = if enable { "Starting" } else { "Stopping" };
                info(format!("{verb} detection…"));
                match handle.set_enabled(enable).await {
                    Ok(()) if enable => info("Detection running".into()),
                    Ok(()) => info("Detection stopped".into()),
                    Err(e) if e.is_recoverable() => {
                        info(format!("Failed: {e}. Is the backend running?"))
                    }
                    Err(e) => info(format!("Failed: {e}")),
                }
            }
            UiCommand::AdjustBrightness(_) | UiCommand::AdjustTransition(_) => {
                let label = handle.current_state().label;
                let Some(current) = handle.mappings().get(label).copied() else {
                    info(format!("No mapping for {label}"));
                    continue;
                };
                let next = nudge(current, &cmd);
                if next == current {
                    continue;
                }
                match handle.update_mapping(label, next).await {
                    Ok(()) => info(format!(
                        "{label}: brightness {}%, transition {:.1}s",
                        next.brightness, next.transition_seconds
                    )),
                    Err(e) => info(format!("{label} updated locally only: {e}")),
                }
            }
            UiCommand::SaveMappings => match mappings_path.as_deref() {
                Some(path) => {
                    let table = handle.mappings();
                    let path_owned = path.to_path_buf();
                    let res = tokio::task::spawn_blocking(move || {
                        storage::save_table(&path_owned, &table)
                    })
                    .await;
                    match res {
                        Ok(Ok(())) => info(format!("Saved mappings: {}", path.display())),
                        Ok(Err(e)) => info(format!("Save failed: {e:#}")),
                        Err(e) => info(format!("Save task failed: {e}")),
                    }
                }
                None => info("No mappings file location available".into()),
            },
            UiCommand::Quit => break,
        }
    }

    shutdown(&handle).await;
    Ok(())
}

/// Stop detection (best effort, bounded) and tear the session down.
pub(crate) async fn shutdown(handle: &SyncHandle) {
    if handle.current_state().enabled {
        match tokio::time::timeout(Duration::from_secs(3), handle.set_enabled(false)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(code = e.code(), "stop on exit failed: {e}"),
            Err(_) => warn!("stop on exit timed out"),
        }
    }
    handle.shutdown();
}
