//! WebSocket client for a ComfyUI-compatible render service.
//!
//! [`ComfyUIClient`] holds the connection configuration for one service.
//! Each render job calls [`ComfyUIClient::connect`] to open its own
//! [`ComfyUIConnection`], identified by a fresh client id so that the
//! service routes that job's events to it.

use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, AUTHORIZATION};
use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// The event-stream socket type.
pub type EventStream =
    tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a render service.
///
/// Stores the WebSocket and HTTP base URLs plus the optional bearer token.
#[derive(Debug, Clone)]
pub struct ComfyUIClient {
    ws_url: String,
    api_url: String,
    auth_token: Option<String>,
}

/// A live event-stream connection.
pub struct ComfyUIConnection {
    /// Client id sent during the handshake; submissions must carry it.
    pub client_id: String,
    /// The raw WebSocket stream for reading frames.
    pub ws_stream: EventStream,
}

impl ComfyUIClient {
    /// Create a client for the service at `api_url` (`http://` or `https://`).
    ///
    /// The WebSocket URL is derived by swapping the scheme for `ws://`
    /// or `wss://`.
    pub fn new(api_url: &str, auth_token: Option<String>) -> Result<Self, ComfyUIClientError> {
        let api_url = api_url.trim_end_matches('/').to_string();
        let ws_url = ws_url_for(&api_url)?;
        Ok(Self {
            ws_url,
            api_url,
            auth_token,
        })
    }

    /// WebSocket base URL (e.g. `wss://host`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// HTTP API base URL (e.g. `https://host`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Full event-stream URL for `client_id`.
    pub fn stream_url(&self, client_id: &str) -> String {
        format!("{}/ws?clientId={}", self.ws_url, client_id)
    }

    /// Open the event stream under a fresh UUID v4 client id.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let url = self.stream_url(&client_id);

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| ComfyUIClientError::Connection(format!("Invalid stream URL {url}: {e}")))?;
        if let Some(token) = &self.auth_token {
            let value = HeaderValue::from_str(&format!("Bearer {token}")).map_err(|e| {
                ComfyUIClientError::Connection(format!("Invalid auth token header: {e}"))
            })?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (ws_stream, _response) = connect_async(request).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to event stream at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::debug!(client_id = %client_id, "Connected to event stream at {}", self.ws_url);

        Ok(ComfyUIConnection {
            client_id,
            ws_stream,
        })
    }
}

/// Derive the WebSocket base URL from an HTTP base URL.
pub fn ws_url_for(api_url: &str) -> Result<String, ComfyUIClientError> {
    if let Some(rest) = api_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(ComfyUIClientError::Connection(format!(
            "Service URL must start with http:// or https://, got '{api_url}'"
        )))
    }
}

/// Errors that can occur on the event stream.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A protocol-level error on an established connection.
    #[error("Protocol error: {0}")]
    Protocol(String),
}
