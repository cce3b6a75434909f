//! Voice agent configuration and presets.

use std::collections::HashMap;

use colloquy_protocol::{
    AudioEncoding, AudioFormat, ConversationConfig, OperatingPoint, SpeakerDiarizationConfig,
    TranscriptionConfig, VocabEntry,
};
use colloquy_segments::DiarizationFocusConfig;
use colloquy_turn::{EndOfUtteranceMode, TurnDetectorConfig};
use serde::{Deserialize, Serialize};

use crate::ClientError;

/// An enrolled speaker from a previous session's speakers-result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnownSpeaker {
    pub label: String,
    pub speaker_identifiers: Vec<String>,
}

/// Flags accompanying a text input turn.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextInputFlags {
    /// Ask the agent layer to interrupt any response in flight.
    pub interrupt_response: bool,
}

/// Full configuration of a voice agent session.
#[derive(Debug, Clone)]
pub struct VoiceAgentConfig {
    // Transcription
    pub language: String,
    pub domain: Option<String>,
    pub output_locale: Option<String>,
    pub operating_point: OperatingPoint,
    /// Final-result latency cap in seconds.
    pub max_delay: f64,
    pub additional_vocab: Vec<VocabEntry>,
    pub punctuation_overrides: Option<serde_json::Value>,

    // End of utterance / turn
    pub end_of_utterance_mode: EndOfUtteranceMode,
    pub end_of_utterance_silence_trigger: f64,
    pub end_of_utterance_max_delay: f64,

    // Diarization
    pub enable_diarization: bool,
    pub speaker_sensitivity: Option<f32>,
    pub prefer_current_speaker: Option<bool>,
    pub max_speakers: Option<u32>,
    pub known_speakers: Vec<KnownSpeaker>,
    pub diarization_focus: DiarizationFocusConfig,

    // Audio
    pub audio_encoding: AudioEncoding,
    pub sample_rate: u32,
    /// Retain a rolling window of session audio even when the acoustic
    /// turn model is not in use.
    pub enable_audio_buffer: bool,
    pub audio_buffer_seconds: f64,
    /// Samples per buffered frame.
    pub audio_buffer_frame_size: usize,
    /// Audio window handed to the acoustic turn model.
    pub smart_turn_audio_seconds: f64,

    // Segmentation
    pub emit_sentences: bool,
}

impl Default for VoiceAgentConfig {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            domain: None,
            output_locale: None,
            operating_point: OperatingPoint::Enhanced,
            max_delay: 2.0,
            additional_vocab: Vec::new(),
            punctuation_overrides: None,
            end_of_utterance_mode: EndOfUtteranceMode::Fixed,
            end_of_utterance_silence_trigger: 0.5,
            end_of_utterance_max_delay: 10.0,
            enable_diarization: false,
            speaker_sensitivity: None,
            prefer_current_speaker: None,
            max_speakers: None,
            known_speakers: Vec::new(),
            diarization_focus: DiarizationFocusConfig::default(),
            audio_encoding: AudioEncoding::PcmS16le,
            sample_rate: 16000,
            enable_audio_buffer: false,
            audio_buffer_seconds: 20.0,
            audio_buffer_frame_size: 160,
            smart_turn_audio_seconds: 8.0,
            emit_sentences: false,
        }
    }
}

impl VoiceAgentConfig {
    /// Lowest latency: fixed end-of-utterance with a short trigger and the
    /// standard operating point. Not recommended for conversation.
    pub fn fast() -> Self {
        Self {
            operating_point: OperatingPoint::Standard,
            enable_diarization: true,
            max_delay: 2.0,
            end_of_utterance_silence_trigger: 0.25,
            end_of_utterance_mode: EndOfUtteranceMode::Fixed,
            ..Default::default()
        }
    }

    /// Balanced conversational defaults with fixed timing.
    pub fn fixed() -> Self {
        Self {
            enable_diarization: true,
            max_delay: 2.0,
            end_of_utterance_silence_trigger: 0.5,
            end_of_utterance_mode: EndOfUtteranceMode::Fixed,
            ..Default::default()
        }
    }

    /// Delay adapts to pauses, slow speech and disfluencies.
    pub fn adaptive() -> Self {
        Self {
            enable_diarization: true,
            max_delay: 2.0,
            end_of_utterance_silence_trigger: 0.7,
            end_of_utterance_mode: EndOfUtteranceMode::Adaptive,
            ..Default::default()
        }
    }

    /// Adaptive timing augmented by the acoustic turn model.
    pub fn smart_turn() -> Self {
        Self {
            enable_diarization: true,
            max_delay: 2.0,
            end_of_utterance_silence_trigger: 0.8,
            end_of_utterance_mode: EndOfUtteranceMode::SmartTurn,
            enable_audio_buffer: true,
            ..Default::default()
        }
    }

    /// No automatic end-of-turn; the caller drives `finalize`.
    pub fn external() -> Self {
        Self {
            enable_diarization: true,
            max_delay: 2.0,
            end_of_utterance_silence_trigger: 0.5,
            end_of_utterance_mode: EndOfUtteranceMode::External,
            ..Default::default()
        }
    }

    /// Raised synchronously at construction for configuration errors.
    pub fn validate(&self) -> Result<(), ClientError> {
        if self.language.is_empty() {
            return Err(ClientError::InvalidConfig("language must be set".into()));
        }
        if self.sample_rate == 0 {
            return Err(ClientError::InvalidConfig("sample_rate must be non-zero".into()));
        }
        if self.max_delay <= 0.0 {
            return Err(ClientError::InvalidConfig("max_delay must be positive".into()));
        }
        if self.end_of_utterance_silence_trigger < 0.0 {
            return Err(ClientError::InvalidConfig(
                "end_of_utterance_silence_trigger must not be negative".into(),
            ));
        }
        if self.end_of_utterance_max_delay <= 0.0 {
            return Err(ClientError::InvalidConfig(
                "end_of_utterance_max_delay must be positive".into(),
            ));
        }
        if let Some(sensitivity) = self.speaker_sensitivity {
            if !(0.0..=1.0).contains(&sensitivity) {
                return Err(ClientError::InvalidConfig(
                    "speaker_sensitivity must be within [0, 1]".into(),
                ));
            }
        }
        if self.audio_buffer_frame_size == 0 {
            return Err(ClientError::InvalidConfig(
                "audio_buffer_frame_size must be non-zero".into(),
            ));
        }
        if self.audio_buffer_seconds <= 0.0 {
            return Err(ClientError::InvalidConfig(
                "audio_buffer_seconds must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Wire transcription config for start-recognition.
    pub fn transcription_config(&self) -> TranscriptionConfig {
        let mut config = TranscriptionConfig {
            language: self.language.clone(),
            domain: self.domain.clone(),
            output_locale: self.output_locale.clone(),
            operating_point: Some(self.operating_point),
            diarization: self.enable_diarization.then(|| "speaker".to_string()),
            enable_partials: Some(true),
            max_delay: Some(self.max_delay),
            ..Default::default()
        };

        if !self.additional_vocab.is_empty() {
            config.additional_vocab = Some(self.additional_vocab.clone());
        }
        if let Some(overrides) = &self.punctuation_overrides {
            config.punctuation_overrides = Some(overrides.clone());
        }

        if self.enable_diarization {
            let speakers: HashMap<String, Vec<String>> = self
                .known_speakers
                .iter()
                .map(|s| (s.label.clone(), s.speaker_identifiers.clone()))
                .collect();
            let diarization = SpeakerDiarizationConfig {
                max_speakers: self.max_speakers,
                speaker_sensitivity: self.speaker_sensitivity,
                prefer_current_speaker: self.prefer_current_speaker,
                speakers: (!speakers.is_empty()).then_some(speakers),
            };
            config.speaker_diarization_config = Some(diarization);
        }

        // The service only runs its own silence detection in fixed mode.
        if self.end_of_utterance_mode == EndOfUtteranceMode::Fixed
            && self.end_of_utterance_silence_trigger > 0.0
        {
            config.conversation_config = Some(ConversationConfig {
                end_of_utterance_silence_trigger: Some(self.end_of_utterance_silence_trigger),
            });
        }

        config
    }

    pub fn audio_format(&self) -> AudioFormat {
        AudioFormat::raw(self.audio_encoding, self.sample_rate)
    }

    pub fn detector_config(&self) -> TurnDetectorConfig {
        TurnDetectorConfig {
            mode: self.end_of_utterance_mode,
            silence_trigger: self.end_of_utterance_silence_trigger,
            max_delay: self.end_of_utterance_max_delay,
            ..Default::default()
        }
    }

    /// Bytes-to-seconds conversion factor for the configured encoding.
    pub fn seconds_per_byte(&self) -> f64 {
        1.0 / (self.sample_rate as f64 * self.audio_encoding.bytes_per_sample() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_validates() {
        assert!(VoiceAgentConfig::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_sample_rate() {
        let config = VoiceAgentConfig {
            sample_rate: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ClientError::InvalidConfig(_))));
    }

    #[test]
    fn test_fixed_mode_sets_conversation_config() {
        let config = VoiceAgentConfig::fixed().transcription_config();
        assert_eq!(
            config
                .conversation_config
                .unwrap()
                .end_of_utterance_silence_trigger,
            Some(0.5)
        );
    }

    #[test]
    fn test_adaptive_mode_keeps_silence_detection_local() {
        let config = VoiceAgentConfig::adaptive().transcription_config();
        assert!(config.conversation_config.is_none());
        assert_eq!(config.diarization.as_deref(), Some("speaker"));
    }

    #[test]
    fn test_known_speakers_forwarded() {
        let config = VoiceAgentConfig {
            enable_diarization: true,
            known_speakers: vec![KnownSpeaker {
                label: "alice".to_string(),
                speaker_identifiers: vec!["id1".to_string()],
            }],
            ..Default::default()
        };

        let diarization = config
            .transcription_config()
            .speaker_diarization_config
            .unwrap();
        assert_eq!(diarization.speakers.unwrap()["alice"], vec!["id1"]);
    }

    #[test]
    fn test_seconds_per_byte() {
        let config = VoiceAgentConfig::default();
        // 16 kHz 16-bit: 32000 bytes per second.
        assert!((config.seconds_per_byte() - 1.0 / 32000.0).abs() < 1e-12);
    }
}
