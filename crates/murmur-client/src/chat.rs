use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use murmur_types::api::NewMessageRequest;
use murmur_types::models::{ChatImageData, Message};

use crate::channel::{ChannelEvent, ChannelState, Connector, NotificationChannel};
use crate::error::TransportError;
use crate::session::Session;
use crate::store::{MessageFeed, MessageStore};
use crate::transport::Transport;

struct Shared<T: Transport, C: Connector> {
    transport: Arc<T>,
    session: Arc<Session>,
    store: MessageStore,
    channel: NotificationChannel<C>,
}

impl<T: Transport, C: Connector> Shared<T, C> {
    /// The server no longer accepts the session.
    async fn force_logout(&self) {
        warn!("session rejected by server, logging out");
        self.channel.stop().await;
        self.store.clear();
        self.session.logout(self.transport.as_ref()).await;
    }
}

/// One logged-in conversation: keeps the store in step with the server for as
/// long as the session lasts.
///
/// Every `Connected` transition and every notification from the channel
/// triggers a fetch of everything after the watermark. Fetches are not
/// serialized; the store's merge makes overlap harmless.
pub struct ChatSession<T: Transport, C: Connector> {
    shared: Arc<Shared<T, C>>,
    sync_loop: Mutex<Option<SyncLoop>>,
}

struct SyncLoop {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl SyncLoop {
    /// Returns once every sync the loop started has finished or been
    /// dropped, so none can touch the store afterwards.
    async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            if e.is_panic() {
                warn!("sync loop panicked: {}", e);
            }
        }
    }
}

impl<T: Transport, C: Connector> ChatSession<T, C> {
    pub fn new(transport: Arc<T>, session: Arc<Session>, connector: C, retry_delay: Duration) -> Self {
        Self {
            shared: Arc::new(Shared {
                transport,
                session,
                store: MessageStore::new(),
                channel: NotificationChannel::new(connector, retry_delay),
            }),
            sync_loop: Mutex::new(None),
        }
    }

    /// Connect the channel and begin syncing. Restarts cleanly if already
    /// running.
    pub async fn start(&self) {
        let mut sync_loop = self.sync_loop.lock().await;
        if let Some(previous) = sync_loop.take() {
            previous.shutdown().await;
        }

        // subscribe before the channel runs so the first Connected is seen
        let events = self.shared.channel.events();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_sync_loop(self.shared.clone(), events, cancel.clone()));
        *sync_loop = Some(SyncLoop { cancel, handle });
        drop(sync_loop);

        self.shared.channel.start().await;
        info!("chat session started");
    }

    /// Post as the logged-in user. A rejected session logs out.
    pub async fn post(
        &self,
        text: impl Into<String>,
        image: Option<ChatImageData>,
    ) -> Result<Message, TransportError> {
        let username = self
            .shared
            .session
            .username()
            .ok_or(TransportError::NotAuthenticated)?;

        let request = NewMessageRequest {
            username,
            text: text.into(),
            image_data: image,
        };

        match self.shared.transport.post_message(&request).await {
            Ok(message) => {
                debug!("posted message {}", message.id);
                Ok(message)
            }
            Err(e) => {
                if e.is_forbidden() {
                    self.logout().await;
                }
                Err(e)
            }
        }
    }

    /// Fetch and merge now, outside of any channel event.
    pub async fn request_sync(&self) -> Result<usize, TransportError> {
        let result = self.shared.store.request_sync(self.shared.transport.as_ref()).await;
        if let Err(e) = &result {
            if e.is_forbidden() {
                self.logout().await;
            }
        }
        result
    }

    /// Stop syncing, drop the local history and end the server session.
    pub async fn logout(&self) {
        self.halt().await;
        self.shared.store.clear();
        self.shared.session.logout(self.shared.transport.as_ref()).await;
    }

    /// Stop syncing but stay logged in.
    pub async fn shutdown(&self) {
        self.halt().await;
        info!("chat session stopped");
    }

    pub fn messages(&self) -> MessageFeed {
        self.shared.store.subscribe()
    }

    pub fn status(&self) -> watch::Receiver<ChannelState> {
        self.shared.channel.status()
    }

    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.shared.channel.events()
    }

    pub fn identity(&self) -> watch::Receiver<Option<String>> {
        self.shared.session.identity()
    }

    pub fn store(&self) -> &MessageStore {
        &self.shared.store
    }

    async fn halt(&self) {
        if let Some(sync_loop) = self.sync_loop.lock().await.take() {
            sync_loop.shutdown().await;
        }
        self.shared.channel.stop().await;
    }
}

impl<T: Transport, C: Connector> Drop for ChatSession<T, C> {
    fn drop(&mut self) {
        if let Some(sync_loop) = self.sync_loop.get_mut().take() {
            sync_loop.cancel.cancel();
        }
    }
}

fn spawn_sync<T: Transport, C: Connector>(
    syncs: &mut JoinSet<Result<usize, TransportError>>,
    shared: &Arc<Shared<T, C>>,
) {
    let shared = shared.clone();
    syncs.spawn(async move { shared.store.request_sync(shared.transport.as_ref()).await });
}

async fn run_sync_loop<T: Transport, C: Connector>(
    shared: Arc<Shared<T, C>>,
    mut events: broadcast::Receiver<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut syncs = JoinSet::new();

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Ok(ChannelEvent::StateChanged(ChannelState::Connected)) => {
                    debug!("connected, catching up");
                    spawn_sync(&mut syncs, &shared);
                }
                Ok(ChannelEvent::Notified) => spawn_sync(&mut syncs, &shared),
                Ok(ChannelEvent::StateChanged(_)) => {}
                Err(RecvError::Lagged(missed)) => {
                    debug!("missed {} channel events, syncing", missed);
                    spawn_sync(&mut syncs, &shared);
                }
                Err(RecvError::Closed) => break,
            },
            Some(joined) = syncs.join_next() => match joined {
                Ok(Ok(added)) => trace!("sync merged {} messages", added),
                Ok(Err(e)) if e.is_forbidden() => {
                    syncs.shutdown().await;
                    shared.force_logout().await;
                    break;
                }
                Ok(Err(e)) => warn!("sync failed: {}", e),
                Err(e) => {
                    if e.is_panic() {
                        warn!("sync task panicked: {}", e);
                    }
                }
            },
        }
    }

    // in-flight syncs must not reach the store once the loop is gone
    syncs.shutdown().await;
}
