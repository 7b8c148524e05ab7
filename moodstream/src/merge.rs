//! Merging generated batches into a timeline

use crate::chain::{chain, chain_in_place};
use crate::client::MAX_SEGMENT_COUNT;
use crate::error::{Error, Result};
use crate::models::{EpochMs, MoodStream, Segment};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Counts driving merges and the display window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergePolicy {
    /// Segments present before the first extension (cold start)
    #[serde(default = "MergePolicy::default_initial_count")]
    pub initial_count: usize,
    /// Segments requested for the first extension
    #[serde(default = "MergePolicy::default_generated_count")]
    pub generated_count: usize,
    /// Segments kept from the first extension, the rest is discarded
    #[serde(default = "MergePolicy::default_keep_generated_count")]
    pub keep_generated_count: usize,
    /// Positions in one display window
    #[serde(default = "MergePolicy::default_window_size")]
    pub window_size: usize,
    /// Remaining positions at which the next window is prefetched
    #[serde(default = "MergePolicy::default_prefetch_threshold")]
    pub prefetch_threshold: usize,
}

impl Default for MergePolicy {
    fn default() -> Self {
        Self {
            initial_count: Self::default_initial_count(),
            generated_count: Self::default_generated_count(),
            keep_generated_count: Self::default_keep_generated_count(),
            window_size: Self::default_window_size(),
            prefetch_threshold: Self::default_prefetch_threshold(),
        }
    }
}

impl MergePolicy {
    const fn default_initial_count() -> usize {
        3
    }

    const fn default_generated_count() -> usize {
        10
    }

    const fn default_keep_generated_count() -> usize {
        7
    }

    const fn default_window_size() -> usize {
        10
    }

    const fn default_prefetch_threshold() -> usize {
        3
    }

    pub fn validate(&self) -> Result<()> {
        if self.initial_count == 0 || self.window_size == 0 {
            return Err(Error::Config(
                "merge.initial_count and merge.window_size must be at least 1".into(),
            ));
        }
        if self.generated_count == 0 || self.generated_count > MAX_SEGMENT_COUNT {
            return Err(Error::Config(format!(
                "merge.generated_count must be within 1..={MAX_SEGMENT_COUNT}"
            )));
        }
        if self.window_size > MAX_SEGMENT_COUNT {
            return Err(Error::Config(format!(
                "merge.window_size must be within 1..={MAX_SEGMENT_COUNT}"
            )));
        }
        if self.keep_generated_count == 0 || self.keep_generated_count > self.generated_count {
            return Err(Error::Config(
                "merge.keep_generated_count must be within 1..=generated_count".into(),
            ));
        }
        if self.initial_count + self.keep_generated_count != self.window_size {
            warn!(
                initial = self.initial_count,
                keep = self.keep_generated_count,
                window = self.window_size,
                "First extension will not fill exactly one display window"
            );
        }
        Ok(())
    }
}

/// Append `generated` to `existing`
///
/// On the first extension past cold start (`existing.len() ==
/// initial_count`) only the first `keep_generated_count` generated segments
/// are kept. The appended part is chained from the end of `existing`, the
/// existing prefix is returned unchanged.
pub fn merge(existing: &[Segment], generated: Vec<Segment>, policy: &MergePolicy) -> Vec<Segment> {
    let first_extension = existing.len() == policy.initial_count;
    let keep = if first_extension {
        policy.keep_generated_count
    } else {
        generated.len()
    };

    if generated.len() > keep {
        debug!(
            generated = generated.len(),
            kept = keep,
            "Discarding generated tail past the first extension"
        );
    }

    let start = match existing.last() {
        Some(last) => last.end_time(),
        None => generated.first().map_or(0, |s| s.start_time),
    };

    let mut merged = Vec::with_capacity(existing.len() + keep);
    merged.extend_from_slice(existing);
    merged.extend(chain(start, generated.into_iter().take(keep)));
    merged
}

/// Build a replacement stream from a generated window
///
/// The new stream gets a fresh identifier and starts at index 0.
pub fn replace(generated: Vec<Segment>, start_time: EpochMs) -> MoodStream {
    let mut segments = generated;
    chain_in_place(start_time, &mut segments);
    MoodStream::new(segments)
}
