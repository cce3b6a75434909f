//! The atomic unit of recognized speech.

use colloquy_protocol::{AttachesTo, RecognitionResult, ResultKind};
use serde::{Deserialize, Serialize};

/// Fragment kind mirrors the recognition result kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FragmentKind {
    Word,
    Punctuation,
}

/// A single word or punctuation item with timing and speaker metadata.
///
/// Indices are assigned by the reconciler on arrival and never reused;
/// within the live list, index order implies non-decreasing start time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeechFragment {
    pub idx: u64,
    /// Seconds relative to session start.
    pub start_time: f64,
    pub end_time: f64,
    pub language: String,
    pub kind: FragmentKind,
    pub is_eos: bool,
    pub is_disfluency: bool,
    pub is_punctuation: bool,
    pub is_final: bool,
    pub attaches_to: Option<AttachesTo>,
    pub content: String,
    pub speaker: Option<String>,
    pub confidence: f32,
    /// Source recognition-result payload, kept for passthrough consumers.
    pub result: serde_json::Value,
}

impl SpeechFragment {
    /// Build a fragment from a recognition result.
    ///
    /// Returns `None` when the result carries no readable content.
    pub fn from_result(idx: u64, result: &RecognitionResult, is_final: bool) -> Option<Self> {
        let alt = result.alternatives.first()?;
        if alt.content.is_empty() {
            return None;
        }

        let is_punctuation = result.kind == ResultKind::Punctuation;
        Some(Self {
            idx,
            start_time: result.start_time,
            end_time: result.end_time,
            language: alt.language.clone().unwrap_or_else(|| "en".to_string()),
            kind: if is_punctuation {
                FragmentKind::Punctuation
            } else {
                FragmentKind::Word
            },
            is_eos: result.is_eos,
            is_disfluency: alt.tags.iter().any(|t| t == "disfluency"),
            is_punctuation,
            is_final,
            attaches_to: result.attaches_to,
            content: alt.content.clone(),
            speaker: alt.speaker.clone(),
            confidence: alt.confidence,
            result: serde_json::to_value(result).unwrap_or_default(),
        })
    }
}
