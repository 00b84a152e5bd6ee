use std::collections::HashSet;

use parking_lot::Mutex;
use tokio::sync::watch;
use tracing::{debug, trace};

use murmur_types::models::Message;

use crate::error::TransportError;
use crate::transport::Transport;

/// Read handle on the ordered message list. `changed()` resolves once per
/// reconciliation that actually added messages.
pub type MessageFeed = watch::Receiver<Vec<Message>>;

/// The local, authoritative copy of the conversation.
///
/// The list never contains two messages with the same id and is always sorted
/// by timestamp when a reader sees it. The watermark is the id of the last
/// message and serves as the cursor for the next fetch.
pub struct MessageStore {
    messages: watch::Sender<Vec<Message>>,
    watermark: Mutex<Option<String>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageStore {
    pub fn new() -> Self {
        let (messages, _) = watch::channel(Vec::new());
        Self {
            messages,
            watermark: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> MessageFeed {
        self.messages.subscribe()
    }

    pub fn snapshot(&self) -> Vec<Message> {
        self.messages.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.messages.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.borrow().is_empty()
    }

    /// Id of the chronologically last message, `None` while empty.
    pub fn watermark(&self) -> Option<String> {
        self.watermark.lock().clone()
    }

    /// Fold `incoming` into the store and return how many messages were new.
    ///
    /// Duplicates are dropped by id, keeping whichever copy was seen first
    /// (stored messages before incoming ones). The result is stable-sorted by
    /// timestamp. When nothing new arrives the store, the watermark and the
    /// subscribers are left alone.
    pub fn reconcile(&self, incoming: Vec<Message>) -> usize {
        if incoming.is_empty() {
            return 0;
        }

        let mut added = 0;
        self.messages.send_if_modified(|current| {
            let Some(merged) = merge(current, incoming) else {
                return false;
            };

            added = merged.len() - current.len();
            *self.watermark.lock() = merged.last().map(|m| m.id.clone());
            *current = merged;
            true
        });

        if added > 0 {
            debug!("merged {} new messages ({} total)", added, self.len());
        } else {
            trace!("fetched batch held no new messages");
        }
        added
    }

    /// Fetch everything after the watermark and reconcile it.
    ///
    /// Overlapping calls are fine: each one merges by id, so a message fetched
    /// twice is stored once. Errors leave the store untouched and are handed
    /// back as-is.
    pub async fn request_sync<T: Transport>(&self, transport: &T) -> Result<usize, TransportError> {
        let cursor = self.watermark();
        let fetched = transport.fetch_messages_since(cursor.as_deref()).await?;
        Ok(self.reconcile(fetched))
    }

    /// Forget everything (logout).
    pub fn clear(&self) {
        self.messages.send_if_modified(|current| {
            *self.watermark.lock() = None;
            if current.is_empty() {
                return false;
            }
            current.clear();
            true
        });
    }
}

/// Existing messages plus the unseen part of `incoming`, sorted, or `None`
/// when `incoming` holds nothing new.
fn merge(existing: &[Message], incoming: Vec<Message>) -> Option<Vec<Message>> {
    let mut seen: HashSet<String> = existing.iter().map(|m| m.id.clone()).collect();
    let fresh: Vec<Message> = incoming
        .into_iter()
        .filter(|m| seen.insert(m.id.clone()))
        .collect();

    if fresh.is_empty() {
        return None;
    }

    let mut merged = Vec::with_capacity(existing.len() + fresh.len());
    merged.extend_from_slice(existing);
    merged.extend(fresh);
    // stable: equal timestamps keep arrival order
    merged.sort_by_key(|m| m.timestamp);
    Some(merged)
}
