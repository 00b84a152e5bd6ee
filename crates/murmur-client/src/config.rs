use std::time::Duration;

pub const DEFAULT_BACKEND_URL: &str = "http://127.0.0.1:3000";

/// Wait between a dropped push connection and the next attempt.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the REST API, without trailing slash.
    pub backend_url: String,
    /// Full URL of the `/notifications` socket.
    pub ws_url: String,
    pub retry_delay: Duration,
}

impl ClientConfig {
    pub fn new(backend_url: impl Into<String>) -> Self {
        let backend_url = backend_url.into().trim_end_matches('/').to_string();
        let ws_url = notifications_url(&backend_url);
        Self {
            backend_url,
            ws_url,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// `MURMUR_BACKEND_URL`, `MURMUR_WS_URL` and `MURMUR_RETRY_DELAY_MS`,
    /// each optional.
    pub fn from_env() -> anyhow::Result<Self> {
        let backend_url =
            std::env::var("MURMUR_BACKEND_URL").unwrap_or_else(|_| DEFAULT_BACKEND_URL.into());
        let mut config = Self::new(backend_url);

        if let Ok(ws_url) = std::env::var("MURMUR_WS_URL") {
            config.ws_url = ws_url;
        }
        if let Ok(delay) = std::env::var("MURMUR_RETRY_DELAY_MS") {
            config.retry_delay = Duration::from_millis(delay.parse()?);
        }

        Ok(config)
    }
}

/// Derive the socket URL from the REST base URL.
pub fn notifications_url(backend_url: &str) -> String {
    format!(
        "{}/notifications",
        backend_url
            .trim_end_matches('/')
            .replace("http://", "ws://")
            .replace("https://", "wss://")
    )
}
