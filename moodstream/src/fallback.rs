//! Deterministic substitute segments
//!
//! When generation keeps returning unusable responses, the timeline is
//! filled with segments cycling the cold-start palette instead of being left
//! short.

use crate::chain::chain;
use crate::cold_start::ColdStartProvider;
use crate::models::{EpochMs, Segment};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Source tag of substitute segments
pub const FALLBACK_SOURCE: &str = "fallback";

/// Generator of substitute batches
///
/// Ids (`fallback-<n>`) keep increasing across batches so that no two
/// substitute segments share a mood id.
#[derive(Debug, Default)]
pub struct SubstituteBatch {
    next_id: AtomicUsize,
}

impl SubstituteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// `count` segments chained from `next_start_time`
    pub fn generate(&self, next_start_time: EpochMs, count: usize) -> Vec<Segment> {
        let first = self.next_id.fetch_add(count, Ordering::Relaxed);
        let segments = (first..first + count).map(|n| {
            let mut segment = ColdStartProvider::palette_segment(n, FALLBACK_SOURCE);
            segment.mood.id = format!("fallback-{n}");
            segment
        });
        chain(next_start_time, segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::is_contiguous;

    #[test]
    fn test_batch_cycles_palette() {
        let substitute = SubstituteBatch::new();
        let batch = substitute.generate(5_000, 4);
        assert_eq!(batch.len(), 4);
        assert_eq!(batch[0].start_time, 5_000);
        assert!(is_contiguous(&batch));
        assert_eq!(batch[0].mood.color, batch[3].mood.color);
        assert!(batch
            .iter()
            .all(|s| s.background_params.source.as_deref() == Some(FALLBACK_SOURCE)));
    }

    #[test]
    fn test_ids_never_repeat() {
        let substitute = SubstituteBatch::new();
        let a = substitute.generate(0, 2);
        let b = substitute.generate(0, 2);
        assert_eq!(a[1].mood.id, "fallback-1");
        assert_eq!(b[0].mood.id, "fallback-2");
    }
}
