//! Transport layer: the HTTP backend, the pull (polling) channel and the push (WebSocket)
//! channel. Channels never touch session state; they only feed [`ChannelEvent`]s into the
//! supervisor's single inbound queue.

mod backend;
mod pull;
mod push;

pub use backend::{DetectionBackend, HttpBackend};
pub(crate) use pull::PullChannel;
pub use push::{PushConnector, PushEvent, PushStream, WsConnector};
pub(crate) use push::PushChannel;

use crate::model::ChannelUpdate;

/// Tagged inbound event. `epoch` identifies the enable cycle that produced it so that
/// late events from torn-down tasks can be told apart from live ones.
#[derive(Debug, Clone)]
pub(crate) enum ChannelEvent {
    Push { epoch: u64, event: PushEvent },
    Polled { epoch: u64, update: ChannelUpdate },
    FallbackElapsed { epoch: u64 },
}

impl ChannelEvent {
    pub(crate) fn epoch(&self) -> u64 {
        match self {
            ChannelEvent::Push { epoch, .. }
            | ChannelEvent::Polled { epoch, .. }
            | ChannelEvent::FallbackElapsed { epoch } => *epoch,
        }
    }
}
