use tokio::sync::watch;
use tracing::{info, warn};

use murmur_types::api::LoginRequest;

use crate::error::TransportError;
use crate::transport::{HttpTransport, Transport};

/// Who is logged in, as a reactive handle. `None` means logged out.
pub struct Session {
    identity: watch::Sender<Option<String>>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        let (identity, _) = watch::channel(None);
        Self { identity }
    }

    pub fn identity(&self) -> watch::Receiver<Option<String>> {
        self.identity.subscribe()
    }

    pub fn username(&self) -> Option<String> {
        self.identity.borrow().clone()
    }

    pub fn is_logged_in(&self) -> bool {
        self.identity.borrow().is_some()
    }

    pub async fn login(
        &self,
        transport: &HttpTransport,
        credentials: &LoginRequest,
    ) -> Result<String, TransportError> {
        let response = transport.login(credentials).await?;
        info!("logged in as {}", response.username);
        self.identity.send_replace(Some(response.username.clone()));
        Ok(response.username)
    }

    /// Tell the server and forget the identity. A failed server call does not
    /// keep the user logged in.
    pub async fn logout<T: Transport>(&self, transport: &T) {
        if let Err(e) = transport.logout().await {
            warn!("logout request failed: {}", e);
        }
        self.clear();
    }

    /// Forget the identity without contacting the server.
    pub fn clear(&self) {
        if self.identity.send_replace(None).is_some() {
            info!("logged out");
        }
    }

    #[cfg(test)]
    pub(crate) fn set_username(&self, username: &str) {
        self.identity.send_replace(Some(username.to_string()));
    }
}
