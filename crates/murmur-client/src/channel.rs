use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::ChannelError;

/// Room for events a slow subscriber may fall behind by before it sees
/// `Lagged`.
const EVENT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ChannelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        };
        f.write_str(label)
    }
}

/// What the channel reports, in the order it happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelEvent {
    StateChanged(ChannelState),
    /// The server pushed a frame: fetch again.
    Notified,
}

/// Application frames from one live connection. The stream ends when the
/// connection closes.
pub type FrameStream = BoxStream<'static, Result<Bytes, ChannelError>>;

/// Opens push connections.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self) -> impl Future<Output = Result<FrameStream, ChannelError>> + Send;
}

/// Connects to the server's `/notifications` WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    url: String,
}

impl WsConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

impl Connector for WsConnector {
    async fn connect(&self) -> Result<FrameStream, ChannelError> {
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ChannelError::InvalidUrl(self.url.clone()));
        }

        let (ws_stream, _) = tokio_tungstenite::connect_async(self.url.as_str()).await?;

        // Ping/Pong are answered by tungstenite while the stream is polled;
        // only data frames matter here.
        let frames = ws_stream.filter_map(|frame| async move {
            match frame {
                Ok(WsMessage::Text(text)) => Some(Ok(Bytes::copy_from_slice(text.as_str().as_bytes()))),
                Ok(WsMessage::Binary(data)) => Some(Ok(Bytes::from(data))),
                Ok(_) => None,
                Err(e) => Some(Err(ChannelError::from(e))),
            }
        });

        Ok(frames.boxed())
    }
}

/// State handle plus ordered event stream, shared with the connection task.
struct Signals {
    state_tx: watch::Sender<ChannelState>,
    events_tx: broadcast::Sender<ChannelEvent>,
}

impl Signals {
    fn transition(&self, next: ChannelState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                return false;
            }
            *state = next;
            true
        });

        if changed {
            debug!("notification channel {}", next);
            let _ = self.events_tx.send(ChannelEvent::StateChanged(next));
        }
    }

    fn notify(&self) {
        let _ = self.events_tx.send(ChannelEvent::Notified);
    }
}

struct Run {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl Run {
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("notification channel task panicked: {}", e);
            }
        }
    }
}

/// Keeps one push connection alive and turns its traffic into
/// [`ChannelEvent`]s.
///
/// After an unexpected close or a failed attempt the channel waits
/// `retry_delay` and tries again, forever, until [`stop`](Self::stop).
pub struct NotificationChannel<C: Connector> {
    connector: Arc<C>,
    retry_delay: Duration,
    signals: Arc<Signals>,
    run: Mutex<Option<Run>>,
}

impl<C: Connector> NotificationChannel<C> {
    pub fn new(connector: C, retry_delay: Duration) -> Self {
        let (state_tx, _) = watch::channel(ChannelState::Disconnected);
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        Self {
            connector: Arc::new(connector),
            retry_delay,
            signals: Arc::new(Signals { state_tx, events_tx }),
            run: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ChannelState {
        *self.signals.state_tx.borrow()
    }

    /// Reactive connection status.
    pub fn status(&self) -> watch::Receiver<ChannelState> {
        self.signals.state_tx.subscribe()
    }

    /// State changes and notifications from now on, in emission order.
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.signals.events_tx.subscribe()
    }

    /// Open a fresh connection, closing the current one first if there is
    /// one.
    pub async fn start(&self) {
        let mut run = self.run.lock().await;
        if let Some(previous) = run.take() {
            debug!("restarting notification channel");
            previous.shutdown().await;
        }

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_connection(
            self.connector.clone(),
            self.signals.clone(),
            self.retry_delay,
            cancel.clone(),
        ));

        *run = Some(Run { cancel, handle });
    }

    /// Close the connection and cancel any pending reconnect. Returns once
    /// the connection task has finished.
    pub async fn stop(&self) {
        let mut run = self.run.lock().await;
        if let Some(current) = run.take() {
            current.shutdown().await;
            info!("notification channel stopped");
        }
    }
}

impl<C: Connector> Drop for NotificationChannel<C> {
    fn drop(&mut self) {
        if let Some(run) = self.run.get_mut().take() {
            run.cancel.cancel();
        }
    }
}

async fn run_connection<C: Connector>(
    connector: Arc<C>,
    signals: Arc<Signals>,
    retry_delay: Duration,
    cancel: CancellationToken,
) {
    loop {
        signals.transition(ChannelState::Connecting);

        let attempt = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            attempt = connector.connect() => attempt,
        };

        match attempt {
            Ok(mut frames) => {
                signals.transition(ChannelState::Connected);
                info!("notification channel connected");

                loop {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            drop(frames);
                            signals.transition(ChannelState::Disconnected);
                            return;
                        }
                        frame = frames.next() => match frame {
                            Some(Ok(payload)) => {
                                trace!("push frame ({} bytes)", payload.len());
                                signals.notify();
                            }
                            Some(Err(e)) => {
                                warn!("notification channel error: {}", e);
                                break;
                            }
                            None => {
                                info!("notification channel closed by server");
                                break;
                            }
                        },
                    }
                }
            }
            Err(e) => warn!("notification channel connect failed: {}", e),
        }

        signals.transition(ChannelState::Disconnected);
        debug!("reconnecting in {:?}", retry_delay);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(retry_delay) => {}
        }
    }

    signals.transition(ChannelState::Disconnected);
}
