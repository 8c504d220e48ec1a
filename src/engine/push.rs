use super::ChannelEvent;
use crate::error::SyncError;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Text frames from an open push connection. The stream ending means the peer closed.
pub type PushStream = BoxStream<'static, Result<String, SyncError>>;

/// Lifecycle of a single push connection, in callback order.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    Opened,
    Message(String),
    Errored(String),
    Closed,
}

/// Opens push connections. Dropping the returned stream releases the connection.
pub trait PushConnector: Send + Sync {
    fn connect(&self) -> BoxFuture<'static, Result<PushStream, SyncError>>;
}

/// WebSocket connector for `/ws/emotions`. Nothing is sent client-to-server after connect.
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl PushConnector for WsConnector {
    fn connect(&self) -> BoxFuture<'static, Result<PushStream, SyncError>> {
        let url = self.url.clone();
        async move {
            let (ws, _resp) = tokio_tungstenite::connect_async(url.as_str())
                .await
                .map_err(|e| SyncError::Transport(format!("connect {url}: {e}")))?;
            let frames = ws.filter_map(|msg| async move {
                match msg {
                    Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                    // Close frames end the stream on the next poll.
                    Ok(_) => None,
                    Err(e) => Some(Err(SyncError::Transport(e.to_string()))),
                }
            });
            Ok(frames.boxed())
        }
        .boxed()
    }
}

/// One open-or-opening push connection, driven by its own task.
///
/// The task reports `Opened`, then one `Message` per text frame, and finishes with either
/// `Errored` or `Closed`. There is no reconnect: a failed channel stays failed until the
/// next enable cycle opens a fresh one. Dropping the handle closes the connection.
pub(crate) struct PushChannel {
    task: JoinHandle<()>,
}

impl PushChannel {
    pub(crate) fn open(
        connector: &dyn PushConnector,
        epoch: u64,
        events: UnboundedSender<ChannelEvent>,
    ) -> Self {
        let connect = connector.connect();
        let task = tokio::spawn(async move {
            let emit = |event: PushEvent| events.send(ChannelEvent::Push { epoch, event }).is_ok();

            let mut frames = match connect.await {
                Ok(frames) => {
                    info!(epoch, "push channel open");
                    if !emit(PushEvent::Opened) {
                        return;
                    }
                    frames
                }
                Err(e) => {
                    warn!(epoch, code = e.code(), "push channel failed to open: {e}");
                    emit(PushEvent::Errored(e.to_string()));
                    return;
                }
            };

            while let Some(frame) = frames.next().await {
                match frame {
                    Ok(text) => {
                        if !emit(PushEvent::Message(text)) {
                            return;
                        }
                    }
                    Err(e) => {
                        warn!(epoch, code = e.code(), "push channel error: {e}");
                        emit(PushEvent::Errored(e.to_string()));
                        return;
                    }
                }
            }
            info!(epoch, "push channel closed by peer");
            emit(PushEvent::Closed);
        });
        Self { task }
    }

    pub(crate) fn close(self) {
        debug!("closing push channel");
    }
}

impl Drop for PushChannel {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::FakeConnector;
    use std::time::Duration;
    use tokio::sync::mpsc;

    async fn next_push(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> PushEvent {
        match rx.recv().await {
            Some(ChannelEvent::Push { event, .. }) => event,
            other => panic!("expected push event, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reports_lifecycle_in_order() {
        let connector = FakeConnector::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let push = PushChannel::open(&connector, 3, tx);

        assert_eq!(next_push(&mut rx).await, PushEvent::Opened);
        connector.socket(0).send_text("{\"emotion\":\"happy\"}");
        assert_eq!(
            next_push(&mut rx).await,
            PushEvent::Message("{\"emotion\":\"happy\"}".into())
        );
        connector.socket(0).fail("reset by peer");
        assert!(matches!(next_push(&mut rx).await, PushEvent::Errored(_)));
        drop(push);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_connection_reports_error_without_opening() {
        let connector = FakeConnector::default();
        *connector.refuse.lock().unwrap() = true;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _push = PushChannel::open(&connector, 1, tx);

        assert!(matches!(next_push(&mut rx).await, PushEvent::Errored(_)));
        assert_eq!(connector.live(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn close_releases_the_connection() {
        let connector = FakeConnector::default();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let push = PushChannel::open(&connector, 1, tx);
        assert_eq!(next_push(&mut rx).await, PushEvent::Opened);
        assert_eq!(connector.live(), 1);

        push.close();
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(connector.live(), 0);
    }
}
