//! Maintains the live fragment list under partial and final updates.

use std::sync::OnceLock;

use colloquy_protocol::{RecognitionResult, TranscriptMetadata};
use regex::Regex;

use crate::fragment::{FragmentKind, SpeechFragment};

/// How `focus_speakers` is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FocusMode {
    /// Keep everyone; speakers outside the focus set are marked inactive.
    #[default]
    Retain,
    /// Drop fragments from speakers outside the focus set entirely.
    Ignore,
}

/// Which speakers to focus on or suppress during a session.
#[derive(Debug, Clone, Default)]
pub struct DiarizationFocusConfig {
    pub focus_speakers: Vec<String>,
    pub ignore_speakers: Vec<String>,
    pub focus_mode: FocusMode,
}

/// Result of one reconciler update.
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// True when the list holds any fragments after the update.
    pub has_fragments: bool,
    /// Fragments spliced in by this update, in arrival order.
    pub added: Vec<SpeechFragment>,
    /// Freshly measured time-to-first-byte, if any.
    pub ttfb_ms: Option<f64>,
}

/// Speaker labels of the form `__NAME__` are reserved for suppressing the
/// agent's own TTS loopback and other known voiceprints.
fn is_reserved_speaker(label: &str) -> bool {
    static RESERVED: OnceLock<Regex> = OnceLock::new();
    RESERVED
        .get_or_init(|| Regex::new(r"^__[A-Z0-9_]{2,}__$").expect("reserved speaker pattern"))
        .is_match(label)
}

/// Single-writer owner of the fragment list.
///
/// Indices come from a monotonic counter and are never reused; the final
/// prefix only grows (modulo trim), while the partial tail is replaced
/// wholesale on every update.
#[derive(Debug, Default)]
pub struct FragmentReconciler {
    next_idx: u64,
    fragments: Vec<SpeechFragment>,
    trim_before: f64,
    last_ttfb_end_time: Option<f64>,
}

impl FragmentReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> &[SpeechFragment] {
        &self.fragments
    }

    /// Oldest audio time still retained.
    pub fn trim_watermark(&self) -> f64 {
        self.trim_before
    }

    fn next_index(&mut self) -> u64 {
        let idx = self.next_idx;
        self.next_idx += 1;
        idx
    }

    /// Splice a partial or final transcript batch into the list.
    ///
    /// `total_audio_seconds` is the audio-time clock derived from bytes
    /// sent, used for the TTFB measurement on partial batches.
    pub fn apply(
        &mut self,
        metadata: &TranscriptMetadata,
        results: &[RecognitionResult],
        is_final: bool,
        focus: &DiarizationFocusConfig,
        total_audio_seconds: f64,
    ) -> UpdateOutcome {
        let mut added: Vec<SpeechFragment> = Vec::new();
        for result in results {
            // Indices are consumed even for dropped candidates, so they
            // stay comparable across updates.
            let idx = self.next_index();
            let Some(fragment) = SpeechFragment::from_result(idx, result, is_final) else {
                continue;
            };

            if fragment.start_time < self.trim_before {
                continue;
            }
            if let Some(speaker) = &fragment.speaker {
                if is_reserved_speaker(speaker) {
                    continue;
                }
                if focus.focus_mode == FocusMode::Ignore
                    && !focus.focus_speakers.is_empty()
                    && !focus.focus_speakers.contains(speaker)
                {
                    continue;
                }
                if focus.ignore_speakers.contains(speaker) {
                    continue;
                }
            }
            added.push(fragment);
        }

        // All partials are discarded before splicing; only committed finals
        // at or past the watermark survive.
        let mut retained: Vec<SpeechFragment> = std::mem::take(&mut self.fragments)
            .into_iter()
            .filter(|f| f.is_final && f.start_time >= self.trim_before)
            .collect();

        if is_final {
            // A duplicate server echo must not grow the final prefix.
            added.retain(|candidate| {
                !retained.iter().any(|existing| {
                    existing.start_time == candidate.start_time
                        && existing.end_time == candidate.end_time
                        && existing.content == candidate.content
                        && existing.speaker == candidate.speaker
                })
            });
        }

        retained.extend(added.iter().cloned());
        retained.sort_by_key(|f| f.idx);
        self.fragments = retained;

        tracing::trace!(
            is_final,
            added = added.len(),
            total = self.fragments.len(),
            watermark = self.trim_before,
            "fragments_updated"
        );

        let ttfb_ms = if is_final {
            None
        } else {
            self.measure_ttfb(metadata.end_time, total_audio_seconds)
        };

        UpdateOutcome {
            has_fragments: !self.fragments.is_empty(),
            added,
            ttfb_ms,
        }
    }

    /// Time-to-first-byte for the first partial word past the previous
    /// watermark: audio-time sent minus the payload's end time.
    fn measure_ttfb(&mut self, payload_end_time: f64, total_audio_seconds: f64) -> Option<f64> {
        if !self.fragments.iter().any(|f| f.kind == FragmentKind::Word) {
            return None;
        }
        let first_start = self.fragments.first()?.start_time;
        if let Some(last) = self.last_ttfb_end_time {
            if first_start <= last {
                return None;
            }
        }

        let ttfb = (total_audio_seconds - payload_end_time) * 1000.0;
        if ttfb <= 0.0 {
            return None;
        }
        self.last_ttfb_end_time = Some(payload_end_time);
        Some(ttfb)
    }

    /// Raise the trim watermark and drop fragments behind it. The
    /// watermark never moves backwards.
    pub fn advance_watermark(&mut self, watermark: f64) {
        if watermark <= self.trim_before {
            return;
        }
        self.trim_before = watermark;
        self.fragments.retain(|f| f.start_time >= watermark);
    }

    /// Discard all state, e.g. on connection error.
    pub fn clear(&mut self) {
        self.fragments.clear();
        self.trim_before = 0.0;
        self.last_ttfb_end_time = None;
    }
}
