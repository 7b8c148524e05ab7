//! Position-based generation triggers
//!
//! The decision itself ([`evaluate`]) is a pure function of the policy, the
//! timeline length and the current index. [`AutoGenerationScheduler`] adds
//! the one-shot bookkeeping: a trigger fires at most once per
//! [`GenerationKey`] until it is explicitly disarmed.

use crate::merge::MergePolicy;
use crate::retry::{GenerationKey, KeyBucket};
use std::collections::HashSet;
use tracing::trace;

/// What the scheduler wants generated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    /// Extend past the cold-start segments
    FirstExtension { count: usize },
    /// Prefetch the next display window
    NextWindow { count: usize },
}

impl Trigger {
    pub fn count(&self) -> usize {
        match self {
            Self::FirstExtension { count } | Self::NextWindow { count } => *count,
        }
    }

    pub fn bucket(&self) -> KeyBucket {
        match self {
            Self::FirstExtension { .. } => KeyBucket::FirstExtension,
            Self::NextWindow { .. } => KeyBucket::NextWindow,
        }
    }
}

/// Index as seen inside the display window
pub fn clamped_index(policy: &MergePolicy, current_index: usize) -> usize {
    current_index.min(policy.window_size.saturating_sub(1))
}

/// Positions left in the display window after the current one
pub fn remaining(policy: &MergePolicy, current_index: usize) -> usize {
    policy
        .window_size
        .saturating_sub(clamped_index(policy, current_index) + 1)
}

/// Pure trigger decision
pub fn evaluate(policy: &MergePolicy, total: usize, current_index: usize) -> Option<Trigger> {
    if total == policy.initial_count && current_index == 0 {
        return Some(Trigger::FirstExtension {
            count: policy.generated_count,
        });
    }

    if total < policy.window_size {
        return None;
    }

    let left = remaining(policy, current_index);
    if left > 0 && left <= policy.prefetch_threshold {
        Some(Trigger::NextWindow {
            count: policy.window_size,
        })
    } else {
        None
    }
}

/// Whether advancing from `current_index` should switch to the next stream
pub fn should_switch(policy: &MergePolicy, current_index: usize, next_ready: bool) -> bool {
    next_ready && clamped_index(policy, current_index) == policy.window_size.saturating_sub(1)
}

/// One-shot trigger bookkeeping
#[derive(Debug, Clone, Default)]
pub struct AutoGenerationScheduler {
    policy: MergePolicy,
    fired: HashSet<GenerationKey>,
}

impl AutoGenerationScheduler {
    pub fn new(policy: MergePolicy) -> Self {
        Self {
            policy,
            fired: HashSet::new(),
        }
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.policy
    }

    /// Evaluate the position and arm the matching key
    ///
    /// Returns `None` when nothing should fire or when the key has already
    /// fired for this stream.
    pub fn poll(
        &mut self,
        stream_id: &str,
        total: usize,
        current_index: usize,
    ) -> Option<(GenerationKey, Trigger)> {
        let trigger = evaluate(&self.policy, total, current_index)?;
        let key = GenerationKey::new(stream_id, trigger.bucket());
        if !self.fired.insert(key.clone()) {
            trace!(key = %key, "Trigger already fired");
            return None;
        }
        Some((key, trigger))
    }

    /// Allow `key` to fire again
    pub fn disarm(&mut self, key: &GenerationKey) {
        self.fired.remove(key);
    }

    /// Drop the keys of streams other than `stream_id`
    pub fn retain_stream(&mut self, stream_id: &str) {
        self.fired.retain(|key| key.stream_id == stream_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_extension() {
        let policy = MergePolicy::default();
        assert_eq!(
            evaluate(&policy, 3, 0),
            Some(Trigger::FirstExtension { count: 10 })
        );
        assert_eq!(evaluate(&policy, 3, 1), None);
    }

    #[test]
    fn test_prefetch_window() {
        let policy = MergePolicy::default();
        let fired: Vec<usize> = (0..10)
            .filter(|&i| evaluate(&policy, 10, i).is_some())
            .collect();
        assert_eq!(fired, vec![6, 7, 8]);
        assert_eq!(evaluate(&policy, 9, 7), None);
    }

    #[test]
    fn test_index_past_window_is_clamped() {
        let policy = MergePolicy::default();
        assert_eq!(clamped_index(&policy, 14), 9);
        assert_eq!(remaining(&policy, 14), 0);
        assert_eq!(evaluate(&policy, 15, 14), None);
        assert!(should_switch(&policy, 14, true));
        assert!(!should_switch(&policy, 9, false));
        assert!(!should_switch(&policy, 8, true));
    }

    #[test]
    fn test_fires_once_per_stream() {
        let mut scheduler = AutoGenerationScheduler::new(MergePolicy::default());
        let (key, trigger) = scheduler.poll("s1", 10, 7).unwrap();
        assert_eq!(trigger, Trigger::NextWindow { count: 10 });
        assert!(scheduler.poll("s1", 10, 7).is_none());
        assert!(scheduler.poll("s1", 10, 8).is_none());
        assert!(scheduler.poll("s2", 10, 7).is_some());

        scheduler.disarm(&key);
        assert!(scheduler.poll("s1", 10, 8).is_some());
    }
}
