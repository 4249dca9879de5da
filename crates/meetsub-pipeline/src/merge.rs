//! Reconcile freshly transcribed segments with a pre-existing subtitle track.
//!
//! The merge is asymmetric: new segments always win. Legacy cues before the resume offset are
//! kept as they are; legacy cues at or after it survive only where no new segment covers them.

use crate::segment::{sort_by_start, Segment};

/// Legacy cues that end at or before `offset`. These are seeded into a resumed run unchanged.
pub fn legacy_before(legacy: &[Segment], offset: f64) -> Vec<Segment> {
    legacy.iter().filter(|s| s.end <= offset).cloned().collect()
}

/// Legacy cues starting at or after `offset` that overlap none of `new`.
pub fn legacy_survivors<'a>(
    legacy: &'a [Segment],
    new: &'a [Segment],
    offset: f64,
) -> impl Iterator<Item = &'a Segment> + 'a {
    legacy
        .iter()
        .filter(move |old| old.start >= offset && !new.iter().any(|n| old.overlaps(n)))
}

/// Full merge: legacy before `offset`, every new segment, and non-overlapping legacy cues at or
/// after `offset`, sorted by start.
pub fn merge_with_legacy(new: &[Segment], legacy: &[Segment], offset: f64) -> Vec<Segment> {
    let mut merged = legacy_before(legacy, offset);
    merged.extend(new.iter().cloned());
    merged.extend(legacy_survivors(legacy, new, offset).cloned());
    sort_by_start(&mut merged);
    merged
}

/// Progress preview: what has been produced so far plus legacy cues the run has not reached
/// yet (those starting at or after `reached`), sorted by start.
pub fn preview(produced: &[Segment], legacy: &[Segment], reached: f64) -> Vec<Segment> {
    let mut merged = produced.to_vec();
    merged.extend(legacy_survivors(legacy, produced, reached).cloned());
    sort_by_start(&mut merged);
    merged
}
