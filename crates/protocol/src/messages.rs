//! Control messages exchanged with the recognition service.

use serde::{Deserialize, Serialize};

use crate::config::{AudioFormat, LanguagePackInfo, TranscriptionConfig};
use crate::{ProtocolError, Result};

/// Messages sent from the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum ClientMessage {
    StartRecognition {
        audio_format: AudioFormat,
        transcription_config: TranscriptionConfig,
    },
    /// No more audio will follow; carries the last audio sequence number.
    EndOfStream { last_seq_no: u64 },
    /// Hint that the current partial prefix should be committed.
    Finalize,
    /// Request speaker enrolment data for the session's speakers.
    GetSpeakers,
}

impl ClientMessage {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Messages received from the service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "message")]
pub enum ServerMessage {
    RecognitionStarted {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        language_pack_info: Option<LanguagePackInfo>,
    },
    AudioAdded {
        seq_no: u64,
    },
    AddPartialTranscript {
        metadata: TranscriptMetadata,
        #[serde(default)]
        results: Vec<RecognitionResult>,
    },
    AddTranscript {
        metadata: TranscriptMetadata,
        #[serde(default)]
        results: Vec<RecognitionResult>,
    },
    /// Server-side silence detection fired.
    EndOfUtterance {
        #[serde(default)]
        metadata: Option<TranscriptMetadata>,
    },
    /// All audio up to the end-of-stream marker has been transcribed.
    EndOfTranscript,
    SpeakersResult {
        #[serde(default)]
        speakers: Vec<SpeakerEnrolment>,
    },
    Info {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        reason: String,
    },
    Warning {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        reason: String,
    },
    Error {
        #[serde(rename = "type", default)]
        kind: Option<String>,
        #[serde(default)]
        reason: String,
    },
}

impl ServerMessage {
    /// Parse a received control frame.
    ///
    /// Unknown `message` discriminators and malformed payloads surface as
    /// `ProtocolError`; the caller decides whether to discard or escalate.
    pub fn from_json(raw: &str) -> Result<Self> {
        serde_json::from_str(raw).map_err(ProtocolError::Malformed)
    }
}

/// Timing metadata of a transcript batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TranscriptMetadata {
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    #[serde(default)]
    pub transcript: String,
}

/// Item kind within a transcript batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    #[default]
    Word,
    Punctuation,
}

/// Attachment relation of a punctuation item to its neighbours.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachesTo {
    Previous,
    Next,
}

/// One recognized word or punctuation mark.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecognitionResult {
    #[serde(rename = "type", default)]
    pub kind: ResultKind,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub end_time: f64,
    /// End-of-sentence marker.
    #[serde(default)]
    pub is_eos: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attaches_to: Option<AttachesTo>,
    #[serde(default)]
    pub alternatives: Vec<Alternative>,
}

/// A candidate reading of a recognition result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alternative {
    pub content: String,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

fn default_confidence() -> f32 {
    1.0
}

/// Speaker enrolment record for reuse in later sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerEnrolment {
    pub label: String,
    #[serde(default)]
    pub speaker_identifiers: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_add_transcript() {
        let raw = r#"{
            "message": "AddTranscript",
            "metadata": {"start_time": 0.0, "end_time": 1.2, "transcript": "Hello world."},
            "results": [
                {
                    "type": "word",
                    "start_time": 0.1,
                    "end_time": 0.5,
                    "alternatives": [{"content": "Hello", "confidence": 0.97, "speaker": "S1"}]
                },
                {
                    "type": "word",
                    "start_time": 0.6,
                    "end_time": 1.1,
                    "alternatives": [{"content": "world", "confidence": 0.95, "speaker": "S1", "tags": []}]
                },
                {
                    "type": "punctuation",
                    "start_time": 1.1,
                    "end_time": 1.1,
                    "is_eos": true,
                    "attaches_to": "previous",
                    "alternatives": [{"content": ".", "confidence": 1.0}]
                }
            ]
        }"#;

        let message = ServerMessage::from_json(raw).unwrap();
        let ServerMessage::AddTranscript { metadata, results } = message else {
            panic!("expected AddTranscript");
        };
        assert_eq!(metadata.transcript, "Hello world.");
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].alternatives[0].content, "Hello");
        assert_eq!(results[2].kind, ResultKind::Punctuation);
        assert_eq!(results[2].attaches_to, Some(AttachesTo::Previous));
        assert!(results[2].is_eos);
    }

    #[test]
    fn test_parse_recognition_started() {
        let raw = r#"{
            "message": "RecognitionStarted",
            "id": "4a1b2c",
            "language_pack_info": {"word_delimiter": " "}
        }"#;

        let message = ServerMessage::from_json(raw).unwrap();
        let ServerMessage::RecognitionStarted { id, language_pack_info } = message else {
            panic!("expected RecognitionStarted");
        };
        assert_eq!(id.as_deref(), Some("4a1b2c"));
        assert_eq!(language_pack_info.unwrap().word_delimiter, " ");
    }

    #[test]
    fn test_unknown_message_is_rejected() {
        let raw = r#"{"message": "SomethingNew", "data": 1}"#;
        assert!(ServerMessage::from_json(raw).is_err());
    }

    #[test]
    fn test_start_recognition_serializes_discriminator() {
        let message = ClientMessage::StartRecognition {
            audio_format: AudioFormat::raw(crate::AudioEncoding::PcmS16le, 16000),
            transcription_config: TranscriptionConfig::default(),
        };

        let value: serde_json::Value = serde_json::from_str(&message.to_json().unwrap()).unwrap();
        assert_eq!(value["message"], "StartRecognition");
        assert_eq!(value["audio_format"]["sample_rate"], 16000);
        assert_eq!(value["transcription_config"]["language"], "en");
    }

    #[test]
    fn test_end_of_stream_carries_sequence() {
        let value: serde_json::Value =
            serde_json::from_str(&ClientMessage::EndOfStream { last_seq_no: 42 }.to_json().unwrap())
                .unwrap();
        assert_eq!(value["message"], "EndOfStream");
        assert_eq!(value["last_seq_no"], 42);
    }
}
