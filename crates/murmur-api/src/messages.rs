use axum::{
    Extension, Json,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use serde::Deserialize;
use tracing::{debug, error, warn};
use uuid::Uuid;

use murmur_db::models::MessageRow;
use murmur_types::api::{Claims, ErrorResponse, NewMessageRequest};
use murmur_types::events::GatewayEvent;
use murmur_types::models::{ChatImageData, Message};

use crate::auth::AppState;

/// How much history a client without a cursor receives.
pub const LATEST_MESSAGES_LIMIT: u32 = 20;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageQuery {
    /// Cursor: id of the newest message the client already has. Missing or
    /// empty means "send the latest page".
    #[serde(default)]
    pub from_id: Option<String>,
}

pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageQuery>,
    Extension(_claims): Extension<Claims>,
) -> Result<Json<Vec<Message>>, StatusCode> {
    let db = state.clone();
    let from_id = query.from_id.filter(|id| !id.is_empty());

    // Run blocking DB query off the async runtime
    let rows = tokio::task::spawn_blocking(move || match from_id.as_deref() {
        None => db.db.get_latest_messages(LATEST_MESSAGES_LIMIT).map(Some),
        Some(id) => db.db.get_messages_after(id),
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("message query failed: {:#}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(rows.into_iter().map(message_from_row).collect()))
}

/// Store a message and tell every notification socket about it.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<NewMessageRequest>,
) -> Result<Response, StatusCode> {
    if claims.username != req.username {
        warn!(
            "{} ({}) tried to post as '{}'",
            claims.username, claims.sub, req.username
        );
        return Ok((
            StatusCode::FORBIDDEN,
            Json(ErrorResponse { message: "Claimed id and token id are different.".into() }),
        )
            .into_response());
    }

    if req.text.is_empty() && req.image_data.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let (image_data, image_type) = match &req.image_data {
        Some(image) => {
            if image.kind.is_empty() || !image.kind.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(StatusCode::BAD_REQUEST);
            }
            let bytes = B64.decode(&image.data).map_err(|_| StatusCode::BAD_REQUEST)?;
            (Some(bytes), Some(image.kind.clone()))
        }
        None => (None, None),
    };

    let mut message = Message {
        id: Uuid::new_v4().to_string(),
        username: claims.username.clone(),
        text: req.text,
        timestamp: chrono::Utc::now().timestamp_millis(),
        image_data: req.image_data,
    };

    let row = MessageRow {
        id: message.id.clone(),
        username: message.username.clone(),
        text: message.text.clone(),
        timestamp: message.timestamp,
        image_data,
        image_type,
    };

    // the store may move the timestamp forward to keep cursors consistent
    let db = state.clone();
    message.timestamp = tokio::task::spawn_blocking(move || db.db.insert_message(&row))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("insert failed: {:#}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let listeners = state
        .dispatcher
        .broadcast(GatewayEvent::MessageCreated { id: message.id.clone() });
    debug!(
        "{} stored message {} ({} sockets notified)",
        message.username, message.id, listeners
    );

    Ok((StatusCode::CREATED, Json(message)).into_response())
}

fn message_from_row(row: MessageRow) -> Message {
    let image_data = match (row.image_data, row.image_type) {
        (Some(bytes), Some(kind)) => Some(ChatImageData {
            data: B64.encode(&bytes),
            kind,
        }),
        (None, None) => None,
        _ => {
            warn!("Message '{}' has a partial image record, dropping it", row.id);
            None
        }
    };

    Message {
        id: row.id,
        username: row.username,
        text: row.text,
        timestamp: row.timestamp,
        image_data,
    }
}
