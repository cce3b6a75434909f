//! Transport adapter between the session controller and the STT service.
//!
//! Control messages travel as JSON text frames, audio as binary frames.
//! The adapter preserves submission order on a single connection, tags
//! outbound audio with a monotonic sequence number, and parses inbound
//! frames into typed messages at the boundary. Credentials are opaque: an
//! `AuthProvider` contributes handshake headers and nothing else.

mod ws;

pub use ws::{WsTransport, WsTransportConfig};

use std::time::Duration;

use async_trait::async_trait;
use colloquy_protocol::{ClientMessage, ServerMessage};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),
    #[error("not connected")]
    NotConnected,
    #[error("send failed: {0}")]
    Send(String),
    #[error("receive failed: {0}")]
    Receive(String),
    #[error("connection closed by server")]
    Closed,
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// Produces handshake headers carrying the caller's credentials.
pub trait AuthProvider: Send + Sync {
    fn headers(&self) -> Vec<(String, String)>;
}

/// Bearer-token authentication with an API key.
pub struct ApiKeyAuth {
    api_key: String,
}

impl ApiKeyAuth {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
        }
    }
}

impl AuthProvider for ApiKeyAuth {
    fn headers(&self) -> Vec<(String, String)> {
        vec![("Authorization".to_string(), format!("Bearer {}", self.api_key))]
    }
}

/// Ordered, bidirectional message channel to the STT service.
///
/// Implementations must deliver sends in submission order and received
/// messages in the order the server produced them. `receive` resolves to
/// `TransportError::Closed` once the peer has gone away.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_control(&self, message: ClientMessage) -> Result<()>;

    /// Send one audio frame; returns its sequence number.
    async fn send_audio(&self, frame: Vec<u8>) -> Result<u64>;

    async fn receive(&self) -> Result<ServerMessage>;

    async fn close(&self) -> Result<()>;

    /// Sequence number of the last audio frame accepted for sending.
    fn last_audio_seq(&self) -> u64;
}
