//! Speech fragment reconciliation and segment views.
//!
//! Fragments are the atomic words and punctuation marks produced by the
//! recognition service. The reconciler maintains the live fragment list
//! under a stream of overlapping partial and final batches; the view
//! builder is a pure function that groups the list into speaker segments
//! with annotations, suitable for diffing between consecutive states.

mod annotation;
mod fragment;
mod reconciler;
mod text;
mod view;

pub use annotation::{annotate_fragments, AnnotationFlags};
pub use fragment::{FragmentKind, SpeechFragment};
pub use reconciler::{
    DiarizationFocusConfig, FocusMode, FragmentReconciler, UpdateOutcome,
};
pub use text::{character_error_rate, normalize};
pub use view::{SegmentView, SpeakerSegment, ViewConfig};
