use async_trait::async_trait;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

pub const AGENT_KEY_HEADER: &str = "x-agent-key";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("credential cannot be sent as a header value")]
    InvalidKey,
    #[error("handshake with {endpoint} failed: {source}")]
    Handshake {
        endpoint: String,
        source: tungstenite::Error,
    },
    #[error("send failed: {0}")]
    Send(#[source] tungstenite::Error),
    #[error("close failed: {0}")]
    Close(#[source] tungstenite::Error),
}

/// What the server told us during the upgrade.
#[derive(Debug, Clone, Default)]
pub struct Handshake {
    pub tenant_id: Option<String>,
}

/// Ordered, single-writer channel for outbound payloads.
#[async_trait]
pub trait Transport: Send {
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError>;
    async fn close(&mut self) -> Result<(), TransportError>;
}

pub struct WsTransport {
    sink: SplitSink<WsStream, Message>,
    reader: JoinHandle<()>,
}

impl WsTransport {
    /// Opens the websocket once, sending the credential with the upgrade request.
    pub async fn connect(
        endpoint: &str,
        api_key: &str,
    ) -> Result<(Self, Handshake), TransportError> {
        let handshake_err = |source| TransportError::Handshake {
            endpoint: endpoint.to_string(),
            source,
        };

        let mut request = endpoint.into_client_request().map_err(handshake_err)?;
        let key = HeaderValue::from_str(api_key).map_err(|_| TransportError::InvalidKey)?;
        request.headers_mut().insert(AGENT_KEY_HEADER, key);

        let (stream, response) = connect_async(request).await.map_err(handshake_err)?;
        let tenant_id = response
            .headers()
            .get(TENANT_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        info!(
            endpoint,
            status = %response.status(),
            tenant_id = tenant_id.as_deref().unwrap_or("-"),
            "websocket connected"
        );

        let (sink, inbound) = stream.split();
        let reader = tokio::spawn(drain_inbound(inbound));

        Ok((Self { sink, reader }, Handshake { tenant_id }))
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_text(&mut self, payload: String) -> Result<(), TransportError> {
        self.sink
            .send(Message::Text(payload))
            .await
            .map_err(TransportError::Send)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.sink.close().await.map_err(TransportError::Close)
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

// Inbound frames are never acted on; reading them keeps ping/pong and close
// handling moving.
async fn drain_inbound(mut inbound: SplitStream<WsStream>) {
    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Close(frame)) => {
                warn!(frame = ?frame, "server closed the websocket");
                break;
            }
            Ok(message) => debug!(len = message.len(), "inbound frame ignored"),
            Err(err) => {
                warn!(error = %err, "websocket read failed");
                break;
            }
        }
    }
}
