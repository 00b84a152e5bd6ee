//! Fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use bytes::Bytes;
use futures_util::StreamExt;
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tokio_tungstenite::tungstenite;

use murmur_types::api::NewMessageRequest;
use murmur_types::models::Message;

use crate::channel::{Connector, FrameStream};
use crate::error::{ChannelError, TransportError};
use crate::transport::Transport;

pub type FrameSender = mpsc::UnboundedSender<Result<Bytes, ChannelError>>;

pub fn msg(id: &str, timestamp: i64) -> Message {
    Message {
        id: id.to_string(),
        username: "alice".to_string(),
        text: format!("text {id}"),
        timestamp,
        image_data: None,
    }
}

/// A connection whose frames are fed through the returned sender. Dropping
/// the sender closes the connection.
pub fn connection() -> (FrameSender, FrameStream) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stream = futures_util::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    });
    (tx, stream.boxed())
}

pub fn refused() -> ChannelError {
    ChannelError::WebSocket(tungstenite::Error::ConnectionClosed)
}

/// Hands out pre-built connection attempts in order; once the script runs
/// out, further attempts hang.
#[derive(Clone, Default)]
pub struct ScriptedConnector {
    attempts: Arc<Mutex<VecDeque<Result<FrameStream, ChannelError>>>>,
    connects: Arc<AtomicUsize>,
}

impl ScriptedConnector {
    pub fn push(&self, attempt: Result<FrameStream, ChannelError>) {
        self.attempts.lock().push_back(attempt);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Connector for ScriptedConnector {
    async fn connect(&self) -> Result<FrameStream, ChannelError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let next = self.attempts.lock().pop_front();
        match next {
            Some(attempt) => attempt,
            None => futures_util::future::pending().await,
        }
    }
}

/// Serves canned fetch responses, records cursors and posts. With no canned
/// response left a fetch returns nothing new and a post echoes the request.
#[derive(Default)]
pub struct FakeTransport {
    fetches: Mutex<VecDeque<Result<Vec<Message>, TransportError>>>,
    gate: Mutex<Option<Arc<Notify>>>,
    in_flight: AtomicUsize,
    posts: Mutex<VecDeque<Result<Message, TransportError>>>,
    pub cursors: Mutex<Vec<Option<String>>>,
    pub posted: Mutex<Vec<NewMessageRequest>>,
    logouts: AtomicUsize,
}

impl FakeTransport {
    pub fn respond(&self, response: Result<Vec<Message>, TransportError>) {
        self.fetches.lock().push_back(response);
    }

    pub fn respond_to_post(&self, response: Result<Message, TransportError>) {
        self.posts.lock().push_back(response);
    }

    /// Make every fetch wait for a permit on the returned `Notify`.
    pub fn hold_fetches(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock() = Some(gate.clone());
        gate
    }

    /// Fetches started and not yet finished or dropped.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.cursors.lock().len()
    }

    pub fn logouts(&self) -> usize {
        self.logouts.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    async fn fetch_messages_since(&self, cursor: Option<&str>) -> Result<Vec<Message>, TransportError> {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _in_flight = InFlight(&self.in_flight);
        self.cursors.lock().push(cursor.map(str::to_string));

        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.fetches.lock().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn post_message(&self, request: &NewMessageRequest) -> Result<Message, TransportError> {
        self.posted.lock().push(request.clone());
        let canned = self.posts.lock().pop_front();
        canned.unwrap_or_else(|| {
            Ok(Message {
                id: format!("posted-{}", self.posted.lock().len()),
                username: request.username.clone(),
                text: request.text.clone(),
                timestamp: 0,
                image_data: request.image_data.clone(),
            })
        })
    }

    async fn logout(&self) -> Result<(), TransportError> {
        self.logouts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}
