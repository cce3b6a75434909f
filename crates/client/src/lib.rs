//! Voice agent client for realtime speech-to-text.
//!
//! Sits between an audio source and the cloud STT service, reconciling the
//! raw partial/final word stream into speaker segments and conversational
//! events (interim/final segments, speaker VAD, end of turn) with strong
//! ordering guarantees. Audio capture, playback and the STT service itself
//! are external collaborators.

mod client;
mod config;

pub use client::VoiceAgentClient;
pub use config::{KnownSpeaker, TextInputFlags, VoiceAgentConfig};

// The public vocabulary of the event stream and configuration surface.
pub use colloquy_events::{AgentEvent, Subscription};
pub use colloquy_protocol::{AudioEncoding, OperatingPoint, VocabEntry};
pub use colloquy_segments::{DiarizationFocusConfig, FocusMode};
pub use colloquy_transport::{ApiKeyAuth, AuthProvider, Transport};
pub use colloquy_turn::{EndOfUtteranceMode, SmartTurnPredicate, TurnPrediction};

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("already connected")]
    AlreadyConnected,
    #[error("not connected")]
    NotConnected,
    #[error("recognition was not acknowledged within {0:?}")]
    HandshakeTimeout(Duration),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("server rejected the session: {0}")]
    Rejected(String),
    #[error(transparent)]
    Transport(#[from] colloquy_transport::TransportError),
    #[error(transparent)]
    Audio(#[from] colloquy_audio::AudioError),
}
