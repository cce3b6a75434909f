//! WebSocket implementation of the transport.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use colloquy_protocol::{ClientMessage, ServerMessage};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use uuid::Uuid;

use crate::{AuthProvider, Result, Transport, TransportError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Bound on queued outbound frames. When the service drains slowly the
/// audio send path blocks here, throttling the producer.
const OUTBOUND_CAPACITY: usize = 64;
const INBOUND_CAPACITY: usize = 256;

#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    pub url: String,
    /// Value of the `sm-app` endpoint query parameter.
    pub app: Option<String>,
}

enum Outbound {
    Control(String),
    Audio(Vec<u8>),
    Close,
}

/// WebSocket transport with a background pump task.
///
/// The pump owns the socket; callers talk to it through bounded channels,
/// which keeps send ordering intact without holding a lock across await
/// points.
pub struct WsTransport {
    outbound_tx: mpsc::Sender<Outbound>,
    inbound_rx: Mutex<mpsc::Receiver<ServerMessage>>,
    audio_seq: AtomicU64,
    closed: Arc<AtomicBool>,
    request_id: String,
}

impl WsTransport {
    /// Establish the WebSocket connection within a 5-second bound.
    pub async fn connect(config: WsTransportConfig, auth: &dyn AuthProvider) -> Result<Self> {
        let request_id = Uuid::new_v4().to_string();
        let url = decorate_url(&config.url, config.app.as_deref());

        let mut request = url
            .clone()
            .into_client_request()
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        {
            let headers = request.headers_mut();
            insert_header(headers, "X-Request-Id", &request_id)?;
            for (name, value) in auth.headers() {
                insert_header(headers, &name, &value)?;
            }
        }

        let (stream, _response) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(request))
            .await
            .map_err(|_| TransportError::Timeout(CONNECT_TIMEOUT))?
            .map_err(|e| TransportError::Connection(e.to_string()))?;

        tracing::debug!(url = %url, request_id = %request_id, "websocket_connected");
        Ok(Self::from_stream(stream, request_id))
    }

    fn from_stream(
        stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
        request_id: String,
    ) -> Self {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(pump(stream, outbound_rx, inbound_tx, closed.clone()));

        Self {
            outbound_tx,
            inbound_rx: Mutex::new(inbound_rx),
            audio_seq: AtomicU64::new(0),
            closed,
            request_id,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn send_control(&self, message: ClientMessage) -> Result<()> {
        let json = message
            .to_json()
            .map_err(|e| TransportError::Send(e.to_string()))?;
        self.outbound_tx
            .send(Outbound::Control(json))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn send_audio(&self, frame: Vec<u8>) -> Result<u64> {
        self.outbound_tx
            .send(Outbound::Audio(frame))
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(self.audio_seq.fetch_add(1, Ordering::AcqRel) + 1)
    }

    async fn receive(&self) -> Result<ServerMessage> {
        let mut inbound = self.inbound_rx.lock().await;
        inbound.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.outbound_tx.send(Outbound::Close).await;
        Ok(())
    }

    fn last_audio_seq(&self) -> u64 {
        self.audio_seq.load(Ordering::Acquire)
    }
}

/// Single task owning the socket: drains the outbound queue and forwards
/// parsed inbound messages. Ends on close request or socket error.
async fn pump(
    mut stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut outbound_rx: mpsc::Receiver<Outbound>,
    inbound_tx: mpsc::Sender<ServerMessage>,
    closed: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            command = outbound_rx.recv() => {
                match command {
                    Some(Outbound::Control(json)) => {
                        if let Err(e) = stream.send(Message::Text(json)).await {
                            tracing::warn!(error = %e, "control_send_failed");
                            break;
                        }
                    }
                    Some(Outbound::Audio(frame)) => {
                        if let Err(e) = stream.send(Message::Binary(frame)).await {
                            tracing::warn!(error = %e, "audio_send_failed");
                            break;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = stream.close(None).await;
                        break;
                    }
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(raw))) => {
                        match ServerMessage::from_json(&raw) {
                            Ok(message) => {
                                if inbound_tx.send(message).await.is_err() {
                                    break;
                                }
                            }
                            // Unknown or malformed messages are dropped;
                            // the session continues.
                            Err(e) => {
                                tracing::warn!(error = %e, "discarding_unparseable_message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::warn!(error = %e, "websocket_receive_failed");
                        break;
                    }
                }
            }
        }
    }
    closed.store(true, Ordering::Release);
    // Dropping inbound_tx closes the receive side, surfacing `Closed`.
}

fn insert_header(
    headers: &mut tokio_tungstenite::tungstenite::http::HeaderMap,
    name: &str,
    value: &str,
) -> Result<()> {
    let name = HeaderName::from_bytes(name.as_bytes())
        .map_err(|e| TransportError::Connection(e.to_string()))?;
    let value =
        HeaderValue::from_str(value).map_err(|e| TransportError::Connection(e.to_string()))?;
    headers.insert(name, value);
    Ok(())
}

/// Append the SDK identification query parameters the service expects.
fn decorate_url(url: &str, app: Option<&str>) -> String {
    let version = env!("CARGO_PKG_VERSION");
    let app = app.unwrap_or("voice-sdk");
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}sm-app={app}&sm-sdk=rust-{version}")
}
