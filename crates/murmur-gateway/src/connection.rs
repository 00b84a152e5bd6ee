use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, info, trace, warn};

use murmur_types::events::GatewayEvent;

use crate::dispatcher::Dispatcher;

/// How often an idle socket is pinged.
const PING_EVERY: Duration = Duration::from_secs(15);

/// Pings in a row that may go unanswered before the socket is dropped.
const MAX_MISSED_PONGS: u8 = 2;

/// Serve one `/notifications` socket until either side goes away.
///
/// The socket is push-only: every dispatched event becomes one text frame,
/// and anything the client sends apart from Pong and Close is ignored.
pub async fn handle_connection(socket: WebSocket, dispatcher: Dispatcher) {
    let (sink, stream) = socket.split();

    // subscribe first so a counted socket never misses an event
    let events = dispatcher.subscribe();

    let conn_id = dispatcher.register_session().await;
    info!(
        "notification socket {} opened ({} attached)",
        conn_id,
        dispatcher.session_count().await
    );

    let pong_seen = Arc::new(AtomicBool::new(true));

    let mut push = tokio::spawn(push_events(sink, events, pong_seen.clone()));
    let mut drain = tokio::spawn(drain_client(stream, pong_seen));

    tokio::select! {
        _ = &mut push => drain.abort(),
        _ = &mut drain => push.abort(),
    }

    dispatcher.unregister_session(conn_id).await;
    debug!("notification socket {} closed", conn_id);
}

/// Write one frame per event, pinging on a fixed interval.
async fn push_events(
    mut sink: SplitSink<WebSocket, Message>,
    mut events: broadcast::Receiver<GatewayEvent>,
    pong_seen: Arc<AtomicBool>,
) {
    let mut ping = tokio::time::interval(PING_EVERY);
    ping.tick().await;
    let mut missed: u8 = 0;

    loop {
        let frame = tokio::select! {
            event = events.recv() => match event {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => Message::Text(json.into()),
                    Err(e) => {
                        warn!("could not encode {:?}: {}", event, e);
                        continue;
                    }
                },
                // one frame is enough for the client to resync
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!("socket lagged by {} events", skipped);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return,
            },
            _ = ping.tick() => {
                if pong_seen.swap(false, Ordering::Acquire) {
                    missed = 0;
                } else {
                    missed += 1;
                    if missed >= MAX_MISSED_PONGS {
                        warn!("no pong for {} pings, dropping notification socket", missed);
                        return;
                    }
                }
                Message::Ping(Bytes::new())
            }
        };

        if sink.send(frame).await.is_err() {
            return;
        }
    }
}

/// Read until the client closes, noting pongs for the heartbeat.
async fn drain_client(mut stream: SplitStream<WebSocket>, pong_seen: Arc<AtomicBool>) {
    while let Some(Ok(frame)) = stream.next().await {
        match frame {
            Message::Pong(_) => pong_seen.store(true, Ordering::Release),
            Message::Close(_) => return,
            Message::Text(text) => trace!("ignoring {} byte text frame from client", text.as_str().len()),
            _ => {}
        }
    }
}
