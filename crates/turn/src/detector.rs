//! Delay calculation for end-of-utterance detection.

use colloquy_segments::{AnnotationFlags, SegmentView};
use serde::{Deserialize, Serialize};

/// Strategy for deciding end-of-utterance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfUtteranceMode {
    /// The service detects silence; a fallback timer covers missed signals.
    #[default]
    Fixed,
    /// Delay adapts to speech rate and disfluencies in the last segment.
    Adaptive,
    /// Adaptive, augmented by the acoustic turn model.
    SmartTurn,
    /// Finalization only happens on explicit `finalize` calls.
    External,
}

#[derive(Debug, Clone)]
pub struct TurnDetectorConfig {
    pub mode: EndOfUtteranceMode,
    /// Silence the service needs before declaring end of utterance.
    pub silence_trigger: f64,
    /// Upper bound for any computed finalization delay.
    pub max_delay: f64,
    /// Multiplier applied to a pending delay when the acoustic model
    /// judges the turn incomplete.
    pub incomplete_extension: f64,
}

impl Default for TurnDetectorConfig {
    fn default() -> Self {
        Self {
            mode: EndOfUtteranceMode::Fixed,
            silence_trigger: 0.5,
            max_delay: 10.0,
            incomplete_extension: 2.0,
        }
    }
}

/// Minimum adaptive base delay in seconds.
const MIN_ADAPTIVE_DELAY: f64 = 0.5;
/// Fixed-mode fallback fires at this multiple of the silence trigger.
const FIXED_FALLBACK_MULTIPLIER: f64 = 5.0;

/// Pure end-of-utterance delay calculator.
///
/// Consumes view diffs; the caller reconciles the returned delay with the
/// currently scheduled timer (schedule, replace, or leave alone).
#[derive(Debug, Clone)]
pub struct TurnDetector {
    config: TurnDetectorConfig,
}

impl TurnDetector {
    pub fn new(config: TurnDetectorConfig) -> Self {
        Self { config }
    }

    pub fn mode(&self) -> EndOfUtteranceMode {
        self.config.mode
    }

    pub fn config(&self) -> &TurnDetectorConfig {
        &self.config
    }

    /// Seconds to wait before finalizing the current view, or `None` when
    /// no timer should be (re)scheduled for this diff.
    ///
    /// A timer is only considered when the diff introduces material new
    /// content (`NEW` or a case-insensitive text change); timing-only and
    /// case-only revisions leave the pending timer untouched.
    pub fn finalize_delay(&self, diff: AnnotationFlags, view: &SegmentView) -> Option<f64> {
        if view.segment_count() == 0 {
            return None;
        }
        if self.config.mode == EndOfUtteranceMode::External {
            return None;
        }
        if !diff.intersects(AnnotationFlags::NEW | AnnotationFlags::UPDATED_FULL_LOWERCASE) {
            return None;
        }

        let delay = match self.config.mode {
            EndOfUtteranceMode::Fixed => {
                Some(self.config.silence_trigger * FIXED_FALLBACK_MULTIPLIER)
            }
            EndOfUtteranceMode::Adaptive | EndOfUtteranceMode::SmartTurn => {
                view.last_active_segment().map(|segment| {
                    let base = self.config.silence_trigger.max(MIN_ADAPTIVE_DELAY);
                    let mut multiplier = 1.5;
                    if segment.annotation.contains(AnnotationFlags::VERY_SLOW_SPEAKER) {
                        multiplier *= 3.0;
                    }
                    if segment.annotation.contains(AnnotationFlags::SLOW_SPEAKER) {
                        multiplier *= 1.5;
                    }
                    if segment.annotation.contains(AnnotationFlags::HAS_DISFLUENCY) {
                        multiplier *= 1.5;
                    }
                    if segment.annotation.contains(AnnotationFlags::ENDS_WITH_DISFLUENCY) {
                        multiplier *= 4.0;
                    }
                    base * multiplier
                })
            }
            EndOfUtteranceMode::External => None,
        };

        // Whatever was computed is bounded by the configured maximum; with
        // no per-segment signal the maximum itself is the delay.
        Some(delay.map_or(self.config.max_delay, |d| d.min(self.config.max_delay)))
    }

    /// Delay after the acoustic model judged the turn incomplete.
    pub fn extended_delay(&self, pending: f64) -> f64 {
        (pending * self.config.incomplete_extension).min(self.config.max_delay)
    }
}
