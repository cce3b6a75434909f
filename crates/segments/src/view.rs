//! Pure construction of speaker segment views from the fragment list.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use colloquy_protocol::AttachesTo;
use serde_json::json;

use crate::annotation::{annotate_fragments, AnnotationFlags};
use crate::fragment::{FragmentKind, SpeechFragment};

/// Inputs that shape view construction.
#[derive(Debug, Clone)]
pub struct ViewConfig {
    /// Language-pack word delimiter used when rendering text.
    pub word_delimiter: String,
    /// Split segments after finalized end-of-sentence fragments.
    pub emit_sentences: bool,
    /// Speakers considered active; empty means everyone is active.
    pub focus_speakers: Vec<String>,
    /// Wall clock corresponding to audio time zero.
    pub base_time: DateTime<Utc>,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            word_delimiter: " ".to_string(),
            emit_sentences: false,
            focus_speakers: Vec::new(),
            base_time: Utc::now(),
        }
    }
}

/// A contiguous run of fragments from one speaker.
#[derive(Debug, Clone)]
pub struct SpeakerSegment {
    pub speaker_id: Option<String>,
    /// Wall-clock timestamp of the first fragment, ISO-8601 with millis.
    pub timestamp: String,
    pub language: String,
    pub is_active: bool,
    pub text: String,
    pub annotation: AnnotationFlags,
    pub fragments: Vec<SpeechFragment>,
}

impl SpeakerSegment {
    pub fn start_time(&self) -> f64 {
        self.fragments.first().map_or(0.0, |f| f.start_time)
    }

    pub fn end_time(&self) -> f64 {
        self.fragments.last().map_or(0.0, |f| f.end_time)
    }

    /// Event payload representation.
    pub fn to_payload(&self) -> serde_json::Value {
        json!({
            "speaker_id": self.speaker_id,
            "text": self.text,
            "language": self.language,
            "timestamp": self.timestamp,
            "start_time": self.start_time(),
            "end_time": self.end_time(),
            "is_active": self.is_active,
            "annotations": self.annotation.names(),
        })
    }
}

/// Snapshot of the fragment list grouped into annotated segments.
#[derive(Debug, Clone, Default)]
pub struct SegmentView {
    pub segments: Vec<SpeakerSegment>,
    /// Fragments that were not yet final when the view was built.
    pub partial_count: usize,
    pub final_count: usize,
}

impl SegmentView {
    /// Build a view from the live fragment list. Pure: the caller's list
    /// is never mutated and the view owns all of its data.
    pub fn build(fragments: &[SpeechFragment], config: &ViewConfig) -> Self {
        let mut groups: Vec<Vec<&SpeechFragment>> = Vec::new();
        for frag in fragments {
            let same_speaker = groups
                .last()
                .and_then(|g| g.last())
                .is_some_and(|prev| prev.speaker == frag.speaker);
            if !same_speaker {
                groups.push(Vec::new());
            }
            if let Some(group) = groups.last_mut() {
                group.push(frag);
            }
        }

        let mut segments = Vec::new();
        for group in groups {
            for subgroup in split_sentences(group, config.emit_sentences) {
                if let Some(segment) = segment_from_fragments(subgroup, config) {
                    segments.push(segment);
                }
            }
        }

        let partial_count = fragments.iter().filter(|f| !f.is_final).count();
        let final_count = fragments.len() - partial_count;
        Self {
            segments,
            partial_count,
            final_count,
        }
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Index of the last segment belonging to an active speaker.
    pub fn last_active_segment_index(&self) -> Option<usize> {
        self.segments.iter().rposition(|s| s.is_active)
    }

    pub fn last_active_segment(&self) -> Option<&SpeakerSegment> {
        self.last_active_segment_index().map(|i| &self.segments[i])
    }

    pub fn start_time(&self) -> f64 {
        self.segments.first().map_or(0.0, SpeakerSegment::start_time)
    }

    pub fn end_time(&self) -> f64 {
        self.segments.last().map_or(0.0, SpeakerSegment::end_time)
    }

    /// Render the whole view as text, one line per segment.
    ///
    /// With `words_only`, punctuation is skipped and words joined with a
    /// plain space; this form is only used for change-detection signatures.
    pub fn format_text(&self, words_only: bool) -> String {
        self.segments
            .iter()
            .map(|s| {
                let text = if words_only {
                    assemble_text(&s.fragments.iter().collect::<Vec<_>>(), " ", true)
                } else {
                    s.text.clone()
                };
                format!("{}|{}", s.speaker_id.as_deref().unwrap_or(""), text)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Signature of per-word timings, used to detect timing-only updates.
    fn timings_signature(&self) -> String {
        let mut signature = String::new();
        for segment in &self.segments {
            for frag in segment.fragments.iter().filter(|f| f.kind == FragmentKind::Word) {
                signature.push_str(&format!("|{}-{}|", frag.start_time, frag.end_time));
            }
        }
        signature
    }

    /// Diff this view (new) against its predecessor (old).
    pub fn compare(&self, previous: Option<&SegmentView>) -> AnnotationFlags {
        let mut result = AnnotationFlags::empty();

        match previous {
            Some(old) if old.segment_count() > 0 => {
                let (new_full, old_full) = (self.format_text(false), old.format_text(false));
                if new_full != old_full {
                    result |= AnnotationFlags::UPDATED_FULL;
                }
                if new_full.to_lowercase() != old_full.to_lowercase() {
                    result |= AnnotationFlags::UPDATED_FULL_LOWERCASE;
                }
                let (new_stripped, old_stripped) = (self.format_text(true), old.format_text(true));
                if new_stripped != old_stripped {
                    result |= AnnotationFlags::UPDATED_STRIPPED;
                }
                if new_stripped.to_lowercase() != old_stripped.to_lowercase() {
                    result |= AnnotationFlags::UPDATED_STRIPPED_LOWERCASE;
                }
                if self.timings_signature() != old.timings_signature() {
                    result |= AnnotationFlags::UPDATED_WORD_TIMINGS;
                }
                if self.final_count != old.final_count {
                    result |= AnnotationFlags::UPDATED_FINALS;
                }
                if self.partial_count != old.partial_count {
                    result |= AnnotationFlags::UPDATED_PARTIALS;
                }
                if self.segment_count() != old.segment_count() {
                    result |= AnnotationFlags::UPDATED_SPEAKERS;
                }
            }
            _ => {
                if self.segment_count() > 0 {
                    result |= AnnotationFlags::NEW;
                }
            }
        }

        if self.segment_count() > 0 && self.partial_count == 0 {
            result |= AnnotationFlags::FINALIZED;
        }

        result
    }
}

fn split_sentences<'a>(
    group: Vec<&'a SpeechFragment>,
    emit_sentences: bool,
) -> Vec<Vec<&'a SpeechFragment>> {
    if !emit_sentences {
        return vec![group];
    }

    let mut subgroups = Vec::new();
    let mut current = Vec::new();
    for frag in group {
        let boundary = frag.is_eos && frag.is_final;
        current.push(frag);
        if boundary {
            subgroups.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        subgroups.push(current);
    }
    subgroups
}

fn segment_from_fragments(
    mut fragments: Vec<&SpeechFragment>,
    config: &ViewConfig,
) -> Option<SpeakerSegment> {
    // Strip punctuation that grammatically belongs to a neighbouring run.
    if fragments
        .first()
        .is_some_and(|f| f.attaches_to == Some(AttachesTo::Previous))
    {
        fragments.remove(0);
    }
    if fragments
        .last()
        .is_some_and(|f| f.attaches_to == Some(AttachesTo::Next))
    {
        fragments.pop();
    }
    let first = fragments.first()?;

    let start_time = fragments
        .iter()
        .map(|f| f.start_time)
        .fold(f64::INFINITY, f64::min);
    let timestamp = (config.base_time + Duration::milliseconds((start_time * 1000.0) as i64))
        .to_rfc3339_opts(SecondsFormat::Millis, true);

    let is_active = config.focus_speakers.is_empty()
        || first
            .speaker
            .as_ref()
            .is_some_and(|s| config.focus_speakers.contains(s));

    let text = assemble_text(&fragments, &config.word_delimiter, false);
    let owned: Vec<SpeechFragment> = fragments.iter().map(|f| (*f).clone()).collect();
    let annotation = annotate_fragments(&owned);

    Some(SpeakerSegment {
        speaker_id: first.speaker.clone(),
        timestamp,
        language: first.language.clone(),
        is_active,
        text,
        annotation,
        fragments: owned,
    })
}

/// Join fragment contents with the word delimiter, omitting it across an
/// attachment relation so punctuation hugs its word.
fn assemble_text(fragments: &[&SpeechFragment], delimiter: &str, words_only: bool) -> String {
    let mut content = String::new();
    let mut previous: Option<&SpeechFragment> = None;
    for frag in fragments {
        if words_only && frag.kind != FragmentKind::Word {
            continue;
        }
        match previous {
            None => content.push_str(&frag.content),
            Some(prev) => {
                let attached = frag.attaches_to == Some(AttachesTo::Previous)
                    || prev.attaches_to == Some(AttachesTo::Next);
                if !attached {
                    content.push_str(delimiter);
                }
                content.push_str(&frag.content);
            }
        }
        previous = Some(frag);
    }
    content
}
