//! Shared event contracts for the voice agent client.
//!
//! Defines the named events the session controller emits and the
//! `EventEmitter` that delivers them to subscribers in emission order.
//! Payloads are `serde_json::Value` objects assembled from typed values
//! at the emission site, so subscribers never depend on internal types.

mod emitter;

pub use emitter::{EventEmitter, Subscription};

use serde::{Deserialize, Serialize};

/// Events emitted by a voice agent session.
///
/// The first group are passthroughs of the recognition service's own
/// messages; the second group are produced by the client's segmentation
/// and turn-taking pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentEvent {
    /// Recognition session acknowledged; carries session id and language pack.
    RecognitionStarted,
    /// Raw partial word batch from the recognition service.
    AddPartialTranscript,
    /// Raw final word batch from the recognition service.
    AddTranscript,
    /// Speaker segments still subject to revision.
    AddInterimSegment,
    /// Speaker segments finalized in this emission cycle.
    AddSegment,
    /// An in-focus speaker started producing words.
    SpeakerStarted,
    /// The active speaker stopped producing words.
    SpeakerEnded,
    /// The conversational floor transitioned; carries the turn id.
    EndOfTurn,
    /// Latest time-to-first-byte measurement in milliseconds.
    TtfbMetrics,
    /// Periodic session metrics (audio time, bytes, last TTFB).
    Metrics,
    /// Speaker enrolment records for use in later sessions.
    SpeakersResult,
    Info,
    Warning,
    Error,
}

impl AgentEvent {
    /// Wire-stable name of the event.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentEvent::RecognitionStarted => "recognition_started",
            AgentEvent::AddPartialTranscript => "add_partial_transcript",
            AgentEvent::AddTranscript => "add_transcript",
            AgentEvent::AddInterimSegment => "add_interim_segment",
            AgentEvent::AddSegment => "add_segment",
            AgentEvent::SpeakerStarted => "speaker_started",
            AgentEvent::SpeakerEnded => "speaker_ended",
            AgentEvent::EndOfTurn => "end_of_turn",
            AgentEvent::TtfbMetrics => "ttfb_metrics",
            AgentEvent::Metrics => "metrics",
            AgentEvent::SpeakersResult => "speakers_result",
            AgentEvent::Info => "info",
            AgentEvent::Warning => "warning",
            AgentEvent::Error => "error",
        }
    }
}

impl std::fmt::Display for AgentEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names_are_snake_case() {
        assert_eq!(AgentEvent::AddInterimSegment.as_str(), "add_interim_segment");
        assert_eq!(AgentEvent::EndOfTurn.as_str(), "end_of_turn");
        assert_eq!(
            serde_json::to_string(&AgentEvent::TtfbMetrics).unwrap(),
            "\"ttfb_metrics\""
        );
    }
}
