//! Wire protocol for the realtime transcription service.
//!
//! Control frames are self-describing JSON objects discriminated by a
//! `message` field; audio frames are binary payloads handled by the
//! transport. Everything loose about the wire format is resolved here, at
//! the parse boundary, so downstream components only ever see typed values.

mod config;
mod messages;

pub use config::{
    AudioEncoding, AudioFormat, ConversationConfig, LanguagePackInfo, OperatingPoint,
    SpeakerDiarizationConfig, TranscriptionConfig, VocabEntry,
};
pub use messages::{
    Alternative, AttachesTo, ClientMessage, RecognitionResult, ResultKind, ServerMessage,
    SpeakerEnrolment, TranscriptMetadata,
};

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
