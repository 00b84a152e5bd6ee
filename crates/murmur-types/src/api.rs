use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::ChatImageData;

// -- JWT Claims --

/// JWT claims shared by the REST middleware and anything else that needs to
/// validate a session token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub username: String,
    pub token: String,
}

// -- Messages --

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NewMessageRequest {
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub image_data: Option<ChatImageData>,
}

/// Body returned alongside 4xx responses that carry an explanation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
}
