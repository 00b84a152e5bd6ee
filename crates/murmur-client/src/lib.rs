//! Client side of Murmur: keeps a local, ordered, deduplicated copy of the
//! message history in step with the server.
//!
//! The server never pushes message contents. `/notifications` only says
//! "something changed"; the [`chat::ChatSession`] reacts to that (and to every
//! reconnect) by fetching everything newer than the store's watermark and
//! folding it in with [`store::MessageStore::reconcile`].

pub mod channel;
pub mod chat;
pub mod config;
pub mod error;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use channel::{ChannelEvent, ChannelState, Connector, NotificationChannel, WsConnector};
pub use chat::ChatSession;
pub use config::ClientConfig;
pub use error::{ChannelError, TransportError};
pub use session::Session;
pub use store::{MessageFeed, MessageStore};
pub use transport::{HttpTransport, Transport};
