use super::{ChannelEvent, DetectionBackend};
use crate::model::StatusResponse;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};

/// Periodic `GET /api/status` poller.
///
/// At most one polling task exists per channel: `start` always tears down the previous
/// task before spawning a new one. Dropping the channel stops polling.
pub(crate) struct PullChannel {
    backend: Arc<dyn DetectionBackend>,
    interval: Duration,
    events: UnboundedSender<ChannelEvent>,
    task: Option<JoinHandle<()>>,
}

impl PullChannel {
    pub(crate) fn new(
        backend: Arc<dyn DetectionBackend>,
        interval: Duration,
        events: UnboundedSender<ChannelEvent>,
    ) -> Self {
        Self {
            backend,
            interval,
            events,
            task: None,
        }
    }

    pub(crate) fn start(&mut self, epoch: u64) {
        if self.task.is_some() {
            debug!("restarting pull channel");
            self.stop();
        }
        let backend = self.backend.clone();
        let events = self.events.clone();
        let interval = self.interval;
        self.task = Some(tokio::spawn(async move {
            poll_loop(backend, interval, epoch, events).await;
        }));
    }

    pub(crate) fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub(crate) fn is_running(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for PullChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_loop(
    backend: Arc<dyn DetectionBackend>,
    interval: Duration,
    epoch: u64,
    events: UnboundedSender<ChannelEvent>,
) {
    // First request goes out one interval after start, like a plain repeating timer.
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let status = match backend.fetch_status().await {
            Ok(status) => status,
            Err(e) => {
                warn!(code = e.code(), "status poll failed: {e}");
                continue;
            }
        };
        match forwardable(status) {
            Some(update) => {
                if events.send(ChannelEvent::Polled { epoch, update }).is_err() {
                    break;
                }
            }
            None => debug!("status poll: nothing to forward"),
        }
    }
}

fn forwardable(status: StatusResponse) -> Option<crate::model::ChannelUpdate> {
    match status.into_update() {
        Ok(update) => update,
        Err(e) => {
            warn!(code = e.code(), "dropping status poll: {e}");
            None
        }
    }
}
