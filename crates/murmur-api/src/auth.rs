use std::sync::Arc;

use anyhow::anyhow;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use murmur_db::Database;
use murmur_db::models::UserRow;
use murmur_gateway::dispatcher::Dispatcher;
use murmur_types::api::{Claims, ErrorResponse, LoginRequest, LoginResponse};

/// Sessions last two hours; the client is logged out on the first 401/403.
const TOKEN_TTL_HOURS: i64 = 2;

const MAX_USERNAME_LEN: usize = 32;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    pub dispatcher: Dispatcher,
}

enum LoginOutcome {
    Accepted(Uuid),
    WrongPassword,
}

/// Log in, creating the account the first time a username is seen.
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, StatusCode> {
    if req.username.trim().is_empty()
        || req.username.len() > MAX_USERNAME_LEN
        || req.password.is_empty()
    {
        return Err(StatusCode::BAD_REQUEST);
    }

    // Argon2 and SQLite are both blocking
    let db = state.clone();
    let username = req.username.clone();
    let outcome = tokio::task::spawn_blocking(move || {
        authenticate(&db.db, &req.username, &req.password)
    })
    .await
    .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
    .map_err(|e| { error!("login for '{}' failed: {:#}", username, e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let user_id = match outcome {
        LoginOutcome::Accepted(user_id) => user_id,
        LoginOutcome::WrongPassword => {
            warn!("Rejected login for '{}': wrong password", username);
            return Ok((
                StatusCode::FORBIDDEN,
                Json(ErrorResponse { message: "Invalid password.".into() }),
            )
                .into_response());
        }
    };

    let token = create_token(&state.jwt_secret, user_id, &username)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    info!("{} ({}) logged in", username, user_id);
    Ok(Json(LoginResponse { username, token }).into_response())
}

/// Tokens are stateless, so there is nothing to revoke server-side.
pub async fn logout() -> StatusCode {
    debug!("logout requested");
    StatusCode::OK
}

fn authenticate(db: &Database, username: &str, password: &str) -> anyhow::Result<LoginOutcome> {
    if let Some(user) = db.get_user_by_username(username)? {
        return verify(&user, password);
    }

    // Hash password with Argon2id
    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!("password hashing failed: {}", e))?
        .to_string();

    let user_id = Uuid::new_v4();
    if db.create_user(&user_id.to_string(), username, &password_hash)? {
        info!("Created account for '{}'", username);
        return Ok(LoginOutcome::Accepted(user_id));
    }

    // A concurrent first login created the account in the meantime
    debug!("account '{}' appeared while logging in, verifying against it", username);
    let user = db
        .get_user_by_username(username)?
        .ok_or_else(|| anyhow!("account '{}' missing after insert conflict", username))?;
    verify(&user, password)
}

fn verify(user: &UserRow, password: &str) -> anyhow::Result<LoginOutcome> {
    let parsed_hash =
        PasswordHash::new(&user.password).map_err(|e| anyhow!("corrupt password hash: {}", e))?;

    if Argon2::default().verify_password(password.as_bytes(), &parsed_hash).is_err() {
        return Ok(LoginOutcome::WrongPassword);
    }

    Ok(LoginOutcome::Accepted(user.id.parse()?))
}

pub fn create_token(secret: &str, user_id: Uuid, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: user_id,
        username: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::hours(TOKEN_TTL_HOURS)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}
