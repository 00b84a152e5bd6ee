use std::future::Future;

use parking_lot::RwLock;
use reqwest::{Client, Response};
use tracing::debug;

use murmur_types::api::{LoginRequest, LoginResponse, NewMessageRequest};
use murmur_types::models::Message;

use crate::error::TransportError;

/// Request/response side of the server.
///
/// Implementations must report an expired or rejected session as an error
/// whose [`TransportError::is_forbidden`] is true; callers log out on it.
pub trait Transport: Send + Sync + 'static {
    /// Messages newer than `cursor` in server order. `None` asks for the
    /// latest page.
    fn fetch_messages_since(
        &self,
        cursor: Option<&str>,
    ) -> impl Future<Output = Result<Vec<Message>, TransportError>> + Send;

    fn post_message(
        &self,
        request: &NewMessageRequest,
    ) -> impl Future<Output = Result<Message, TransportError>> + Send;

    /// End the server-side session and forget the local credentials.
    fn logout(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// [`Transport`] over the Murmur REST API.
pub struct HttpTransport {
    client: Client,
    base_url: String,
    token: RwLock<Option<String>>,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: RwLock::new(None),
        }
    }

    /// Authenticate and keep the issued bearer token for later requests.
    pub async fn login(&self, credentials: &LoginRequest) -> Result<LoginResponse, TransportError> {
        let response = self
            .client
            .post(self.url("/auth/login"))
            .json(credentials)
            .send()
            .await?;

        let login: LoginResponse = check(response)?.json().await?;
        *self.token.write() = Some(login.token.clone());

        debug!("logged in as {}", login.username);
        Ok(login)
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.read().is_some()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn bearer(&self) -> Result<String, TransportError> {
        self.token.read().clone().ok_or(TransportError::NotAuthenticated)
    }
}

impl Transport for HttpTransport {
    async fn fetch_messages_since(&self, cursor: Option<&str>) -> Result<Vec<Message>, TransportError> {
        let token = self.bearer()?;
        let response = self
            .client
            .get(self.url("/messages"))
            .query(&[("fromId", cursor.unwrap_or_default())])
            .bearer_auth(token)
            .send()
            .await?;

        let messages: Vec<Message> = check(response)?.json().await?;
        debug!("fetched {} messages after {:?}", messages.len(), cursor);
        Ok(messages)
    }

    async fn post_message(&self, request: &NewMessageRequest) -> Result<Message, TransportError> {
        let token = self.bearer()?;
        let response = self
            .client
            .post(self.url("/messages"))
            .json(request)
            .bearer_auth(token)
            .send()
            .await?;

        Ok(check(response)?.json().await?)
    }

    async fn logout(&self) -> Result<(), TransportError> {
        let token = self.token.write().take();

        let mut request = self.client.post(self.url("/auth/logout"));
        if let Some(token) = token {
            request = request.bearer_auth(token);
        }

        check(request.send().await?)?;
        Ok(())
    }
}

fn check(response: Response) -> Result<Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(TransportError::from_status(status))
    }
}
