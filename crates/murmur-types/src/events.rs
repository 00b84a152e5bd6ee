use serde::{Deserialize, Serialize};

/// Frames pushed over `/notifications`.
///
/// Clients are free to ignore the payload: any frame means "something
/// changed, fetch again".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// A message was stored
    MessageCreated { id: String },
}
