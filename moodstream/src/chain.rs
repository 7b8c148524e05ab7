//! Timeline chaining
//!
//! Re-timestamps segments so each one starts exactly when the previous one
//! ends. This is the only place where `start_time` is rewritten.

use crate::models::{EpochMs, Segment};

/// Chain `segments` starting at `start_time`
///
/// All fields other than `start_time` are copied unchanged. An empty input
/// yields an empty output.
pub fn chain(start_time: EpochMs, segments: impl IntoIterator<Item = Segment>) -> Vec<Segment> {
    let mut next = start_time;
    segments
        .into_iter()
        .map(|mut segment| {
            segment.start_time = next;
            next = segment.end_time();
            segment
        })
        .collect()
}

/// Chain in place, returning the end instant of the last segment
pub fn chain_in_place(start_time: EpochMs, segments: &mut [Segment]) -> EpochMs {
    let mut next = start_time;
    for segment in segments.iter_mut() {
        segment.start_time = next;
        next = segment.end_time();
    }
    next
}

/// Whether every adjacent pair is contiguous
pub fn is_contiguous(segments: &[Segment]) -> bool {
    segments
        .windows(2)
        .all(|pair| pair[1].start_time == pair[0].end_time())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fixtures::segment;

    fn sample() -> Vec<Segment> {
        [7_000, 1, 250_000, 42, 130_000]
            .iter()
            .enumerate()
            .map(|(i, d)| {
                let mut s = segment(&format!("s{i}"), *d);
                s.start_time = (i as i64) * -999;
                s
            })
            .collect()
    }

    #[test]
    fn test_adjacent_segments_are_contiguous() {
        for start in [0, 1_700_000_000_000, -5_000] {
            let chained = chain(start, sample());
            assert_eq!(chained[0].start_time, start);
            assert!(is_contiguous(&chained));
        }
    }

    #[test]
    fn test_chain_is_idempotent() {
        let once = chain(1_000, sample());
        let twice = chain(once[0].start_time, once.clone());
        assert_eq!(once, twice);
    }

    #[test]
    fn test_other_fields_untouched() {
        let input = sample();
        let chained = chain(10, input.clone());
        for (a, b) in input.iter().zip(&chained) {
            assert_eq!(a.duration, b.duration);
            assert_eq!(a.mood, b.mood);
        }
    }

    #[test]
    fn test_empty_input() {
        assert!(chain(123, Vec::new()).is_empty());
        assert_eq!(chain_in_place(123, &mut []), 123);
    }
}
