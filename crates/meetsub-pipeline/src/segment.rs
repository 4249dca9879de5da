//! Time-stamped transcript segment shared by the orchestrator, merger and serializers.

use meetsub_voice::RecognizedSegment;
use serde::{Deserialize, Serialize};

/// One cue of transcript text. Times are seconds on the source audio timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
    /// Engine text before term correction; `None` when correction changed nothing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_text: Option<String>,
}

impl Segment {
    /// Build a segment, swapping the bounds if they arrive reversed so `start <= end` holds.
    pub fn new(start: f64, end: f64, text: impl Into<String>) -> Self {
        let (start, end) = if end < start { (end, start) } else { (start, end) };
        Self {
            start,
            end,
            text: text.into(),
            original_text: None,
        }
    }

    /// Engine output moved onto the source timeline by `offset` seconds.
    pub fn from_recognized(seg: &RecognizedSegment, offset: f64) -> Self {
        Self::new(seg.start + offset, seg.end + offset, seg.text.clone())
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Half-open interval overlap: touching cues do not overlap.
    pub fn overlaps(&self, other: &Segment) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Stable sort by start time.
pub fn sort_by_start(segments: &mut [Segment]) {
    segments.sort_by(|a, b| a.start.total_cmp(&b.start));
}
