//! Transcription and audio configuration sent at session start.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Supported PCM encodings for the audio stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudioEncoding {
    /// 16-bit signed little-endian PCM, 2 bytes per sample.
    PcmS16le,
    /// 32-bit float little-endian PCM, 4 bytes per sample.
    PcmF32le,
    /// 8-bit μ-law, 1 byte per sample.
    Mulaw,
}

impl AudioEncoding {
    /// Bytes per sample, used for audio-time accounting.
    pub fn bytes_per_sample(&self) -> u32 {
        match self {
            AudioEncoding::PcmS16le => 2,
            AudioEncoding::PcmF32le => 4,
            AudioEncoding::Mulaw => 1,
        }
    }
}

/// Audio format block of the start-recognition message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    #[serde(rename = "type")]
    pub kind: String,
    pub encoding: AudioEncoding,
    pub sample_rate: u32,
}

impl AudioFormat {
    pub fn raw(encoding: AudioEncoding, sample_rate: u32) -> Self {
        Self {
            kind: "raw".to_string(),
            encoding,
            sample_rate,
        }
    }
}

/// Acoustic model selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatingPoint {
    Standard,
    Enhanced,
}

/// Custom dictionary entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabEntry {
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sounds_like: Option<Vec<String>>,
}

/// Speaker diarization tuning forwarded to the service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpeakerDiarizationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_speakers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_sensitivity: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prefer_current_speaker: Option<bool>,
    /// Enrolled speakers: label to speaker identifiers from a previous
    /// session's speakers-result.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speakers: Option<HashMap<String, Vec<String>>>,
}

/// Server-side end-of-utterance detection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_of_utterance_silence_trigger: Option<f64>,
}

/// Transcription block of the start-recognition message.
///
/// Optional fields serialize only when set, matching the service's
/// sparse-config convention.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_locale: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operating_point: Option<OperatingPoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diarization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_partials: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_delay: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_vocab: Option<Vec<VocabEntry>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub punctuation_overrides: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_diarization_config: Option<SpeakerDiarizationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversation_config: Option<ConversationConfig>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            domain: None,
            output_locale: None,
            operating_point: None,
            diarization: None,
            enable_partials: None,
            max_delay: None,
            additional_vocab: None,
            punctuation_overrides: None,
            speaker_diarization_config: None,
            conversation_config: None,
        }
    }
}

/// Language pack descriptor carried by the recognition-started message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguagePackInfo {
    /// Character inserted between adjacent words when rendering text.
    #[serde(default = "default_word_delimiter")]
    pub word_delimiter: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub writing_direction: Option<String>,
}

impl Default for LanguagePackInfo {
    fn default() -> Self {
        Self {
            word_delimiter: default_word_delimiter(),
            writing_direction: None,
        }
    }
}

fn default_word_delimiter() -> String {
    " ".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sparse_transcription_config() {
        let config = TranscriptionConfig {
            language: "en".to_string(),
            enable_partials: Some(true),
            max_delay: Some(2.0),
            ..Default::default()
        };

        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["language"], "en");
        assert_eq!(value["max_delay"], 2.0);
        assert!(value.get("domain").is_none());
        assert!(value.get("speaker_diarization_config").is_none());
    }

    #[test]
    fn test_audio_format_raw() {
        let value = serde_json::to_value(AudioFormat::raw(AudioEncoding::PcmS16le, 16000)).unwrap();
        assert_eq!(value["type"], "raw");
        assert_eq!(value["encoding"], "pcm_s16le");
        assert_eq!(value["sample_rate"], 16000);
    }

    #[test]
    fn test_bytes_per_sample() {
        assert_eq!(AudioEncoding::PcmS16le.bytes_per_sample(), 2);
        assert_eq!(AudioEncoding::PcmF32le.bytes_per_sample(), 4);
        assert_eq!(AudioEncoding::Mulaw.bytes_per_sample(), 1);
    }
}
