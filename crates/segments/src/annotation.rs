//! Segment and view-diff annotations.

use bitflags::bitflags;

use crate::fragment::{FragmentKind, SpeechFragment};

bitflags! {
    /// Bit-set over the annotation vocabulary.
    ///
    /// The first group describes the contents of a single segment; the
    /// `NEW`/`UPDATED_*`/`FINALIZED` group describes the difference
    /// between two consecutive segment views.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AnnotationFlags: u32 {
        const NO_TEXT = 1 << 0;
        const ONLY_PUNCTUATION = 1 << 1;
        const HAS_PARTIAL = 1 << 2;
        const HAS_FINAL = 1 << 3;
        const STARTS_WITH_FINAL = 1 << 4;
        const ENDS_WITH_FINAL = 1 << 5;
        const ENDS_WITH_EOS = 1 << 6;
        const ENDS_WITH_PUNCTUATION = 1 << 7;
        const HAS_DISFLUENCY = 1 << 8;
        const STARTS_WITH_DISFLUENCY = 1 << 9;
        const ENDS_WITH_DISFLUENCY = 1 << 10;
        const VERY_SLOW_SPEAKER = 1 << 11;
        const SLOW_SPEAKER = 1 << 12;
        const FAST_SPEAKER = 1 << 13;
        const NEW = 1 << 14;
        const UPDATED_FULL = 1 << 15;
        const UPDATED_FULL_LOWERCASE = 1 << 16;
        const UPDATED_STRIPPED = 1 << 17;
        const UPDATED_STRIPPED_LOWERCASE = 1 << 18;
        const UPDATED_WORD_TIMINGS = 1 << 19;
        const UPDATED_FINALS = 1 << 20;
        const UPDATED_PARTIALS = 1 << 21;
        const UPDATED_SPEAKERS = 1 << 22;
        const FINALIZED = 1 << 23;
    }
}

impl AnnotationFlags {
    /// Lower-case flag names for event payloads.
    pub fn names(&self) -> Vec<String> {
        self.iter_names()
            .map(|(name, _)| name.to_ascii_lowercase())
            .collect()
    }
}

/// Words-per-minute below which a speaker counts as very slow.
const VERY_SLOW_WPM: f64 = 30.0;
/// Words-per-minute below which a speaker counts as slow.
const SLOW_WPM: f64 = 80.0;
/// Words-per-minute above which a speaker counts as fast.
const FAST_WPM: f64 = 350.0;

/// Annotate one segment's fragments.
pub fn annotate_fragments(fragments: &[SpeechFragment]) -> AnnotationFlags {
    let mut result = AnnotationFlags::empty();
    let (Some(first), Some(last)) = (fragments.first(), fragments.last()) else {
        return result;
    };
    let penultimate = if fragments.len() > 1 {
        fragments.get(fragments.len() - 2)
    } else {
        None
    };

    let words: Vec<&SpeechFragment> = fragments
        .iter()
        .filter(|f| f.kind == FragmentKind::Word)
        .collect();
    if words.is_empty() {
        result |= AnnotationFlags::NO_TEXT;
    }
    if fragments.iter().all(|f| f.is_punctuation) {
        result |= AnnotationFlags::ONLY_PUNCTUATION;
    }

    if fragments.iter().any(|f| !f.is_final) {
        result |= AnnotationFlags::HAS_PARTIAL;
    }
    if fragments.iter().any(|f| f.is_final) {
        result |= AnnotationFlags::HAS_FINAL;
    }
    if first.is_final {
        result |= AnnotationFlags::STARTS_WITH_FINAL;
    }
    if last.is_final {
        result |= AnnotationFlags::ENDS_WITH_FINAL;
    }

    if last.is_eos {
        result |= AnnotationFlags::ENDS_WITH_EOS;
    }
    if last.is_punctuation {
        result |= AnnotationFlags::ENDS_WITH_PUNCTUATION;
    }

    if fragments.iter().any(|f| f.is_disfluency) {
        result |= AnnotationFlags::HAS_DISFLUENCY;
    }
    if first.is_disfluency {
        result |= AnnotationFlags::STARTS_WITH_DISFLUENCY;
    }
    if last.is_disfluency {
        result |= AnnotationFlags::ENDS_WITH_DISFLUENCY;
    }
    // A trailing mark after a disfluency still counts as ending with one.
    if let Some(penultimate) = penultimate {
        if result.intersects(AnnotationFlags::ENDS_WITH_EOS | AnnotationFlags::ENDS_WITH_PUNCTUATION)
            && penultimate.is_disfluency
        {
            result |= AnnotationFlags::ENDS_WITH_DISFLUENCY;
        }
    }

    // Rate of speech over the last five words; shorter segments are not
    // classified.
    if words.len() >= 5 {
        let window = &words[words.len() - 5..];
        let span = window[window.len() - 1].end_time - window[0].start_time;
        if span > 0.0 {
            let wpm = window.len() as f64 / (span / 60.0);
            if wpm < VERY_SLOW_WPM {
                result |= AnnotationFlags::VERY_SLOW_SPEAKER;
            } else if wpm < SLOW_WPM {
                result |= AnnotationFlags::SLOW_SPEAKER;
            } else if wpm > FAST_WPM {
                result |= AnnotationFlags::FAST_SPEAKER;
            }
        }
    }

    result
}
