//! Bounded retry with in-flight deduplication
//!
//! [`RetryingGenerator`] wraps a [`SegmentGenerator`] and retries failed
//! calls with exponential backoff. Runs are keyed by [`GenerationKey`]: while
//! a run is in flight, further calls with the same key join it instead of
//! issuing new requests.

use crate::client::SegmentGenerator;
use crate::error::{Error, ErrorKind, RetryError};
use crate::models::{EpochMs, Segment};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome shared by every caller of one run
pub type RunResult = std::result::Result<Vec<Segment>, RetryError>;

/// Retry parameters
///
/// `max_attempts` counts every attempt, the first one included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "RetryPolicy::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "RetryPolicy::default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "RetryPolicy::default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "RetryPolicy::default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: Self::default_max_attempts(),
            initial_delay_ms: Self::default_initial_delay_ms(),
            multiplier: Self::default_multiplier(),
            max_delay_ms: Self::default_max_delay_ms(),
        }
    }
}

impl RetryPolicy {
    const fn default_max_attempts() -> u32 {
        3
    }

    const fn default_initial_delay_ms() -> u64 {
        1_000
    }

    const fn default_multiplier() -> f64 {
        2.0
    }

    const fn default_max_delay_ms() -> u64 {
        10_000
    }

    /// Delay to wait after the `failures`-th failed attempt (1-based)
    ///
    /// 1s, 2s, 4s, ... capped at `max_delay_ms`.
    pub fn delay_after(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(63) as i32;
        let raw = self.initial_delay_ms as f64 * self.multiplier.max(1.0).powi(exponent);
        Duration::from_millis(raw.min(self.max_delay_ms as f64) as u64)
    }

    pub fn validate(&self) -> crate::Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.multiplier < 1.0 {
            return Err(Error::Config("retry.multiplier must be >= 1.0".into()));
        }
        Ok(())
    }
}

/// Exponential backoff tracker
struct BackoffState {
    policy: RetryPolicy,
    current: Option<Duration>,
}

impl BackoffState {
    fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            current: None,
        }
    }

    fn next_delay(&mut self) -> Duration {
        let max = Duration::from_millis(self.policy.max_delay_ms);
        let next = match self.current {
            Some(current) => current.mul_f64(self.policy.multiplier.max(1.0)).min(max),
            None => Duration::from_millis(self.policy.initial_delay_ms).min(max),
        };
        self.current = Some(next);
        next
    }
}

/// Logical position a generation run is for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyBucket {
    /// First extension past the cold-start segments
    FirstExtension,
    /// Prefetch of the next display window
    NextWindow,
    /// Regeneration after the given index, numbered per refresh
    Refresh { after_index: usize, generation: u64 },
}

/// Deduplication token: `(stream_id, bucket)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GenerationKey {
    pub stream_id: String,
    pub bucket: KeyBucket,
}

impl GenerationKey {
    pub fn new(stream_id: impl Into<String>, bucket: KeyBucket) -> Self {
        Self {
            stream_id: stream_id.into(),
            bucket,
        }
    }
}

impl fmt::Display for GenerationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.bucket {
            KeyBucket::FirstExtension => write!(f, "{}/first-extension", self.stream_id),
            KeyBucket::NextWindow => write!(f, "{}/next-window", self.stream_id),
            KeyBucket::Refresh {
                after_index,
                generation,
            } => write!(f, "{}/refresh-{}@{}", self.stream_id, generation, after_index),
        }
    }
}

struct InFlight {
    run: Shared<BoxFuture<'static, RunResult>>,
    cancel: CancellationToken,
}

type InFlightMap = Arc<Mutex<HashMap<GenerationKey, InFlight>>>;

/// Retrying, deduplicating wrapper around a [`SegmentGenerator`]
#[derive(Clone)]
pub struct RetryingGenerator {
    inner: Arc<dyn SegmentGenerator>,
    policy: RetryPolicy,
    in_flight: InFlightMap,
    shutdown: CancellationToken,
}

impl RetryingGenerator {
    pub fn new(inner: Arc<dyn SegmentGenerator>, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run a generation for `key`, or join the run already in flight
    ///
    /// The run itself is spawned, so it keeps going (and is still
    /// deduplicated) even if every caller stops awaiting it.
    pub async fn run(&self, key: GenerationKey, next_start_time: EpochMs, count: usize) -> RunResult {
        self.start(key, next_start_time, count).await
    }

    /// Start (or join) a run without awaiting it
    ///
    /// The returned future resolves to the run's result.
    pub fn start(
        &self,
        key: GenerationKey,
        next_start_time: EpochMs,
        count: usize,
    ) -> Shared<BoxFuture<'static, RunResult>> {
        let mut map = self.in_flight.lock();
        if let Some(existing) = map.get(&key) {
            debug!(key = %key, "Joining in-flight generation");
            return existing.run.clone();
        }

        let cancel = self.shutdown.child_token();
        let in_flight = Arc::clone(&self.in_flight);
        let inner = Arc::clone(&self.inner);
        let policy = self.policy.clone();
        let run_key = key.clone();
        let run_cancel = cancel.clone();

        let run = async move {
            let result = retry_loop(inner, policy, run_cancel, &run_key, next_start_time, count).await;
            in_flight.lock().remove(&run_key);
            result
        }
        .boxed()
        .shared();

        map.insert(
            key,
            InFlight {
                run: run.clone(),
                cancel,
            },
        );
        drop(map);

        tokio::spawn(run.clone());
        run
    }

    /// Whether a run for `key` is in flight
    pub fn is_in_flight(&self, key: &GenerationKey) -> bool {
        self.in_flight.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Cancel the run for `key`, if any
    pub fn cancel(&self, key: &GenerationKey) {
        if let Some(entry) = self.in_flight.lock().get(key) {
            debug!(key = %key, "Cancelling generation");
            entry.cancel.cancel();
        }
    }

    /// Cancel every run and refuse new ones
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

async fn retry_loop(
    inner: Arc<dyn SegmentGenerator>,
    policy: RetryPolicy,
    cancel: CancellationToken,
    key: &GenerationKey,
    next_start_time: EpochMs,
    count: usize,
) -> RunResult {
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = BackoffState::new(policy);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled);
        }

        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            outcome = inner.generate(next_start_time, count) => outcome,
        };

        let err = match outcome {
            Ok(segments) => {
                info!(key = %key, attempt, received = segments.len(), "Generation succeeded");
                return Ok(segments);
            }
            Err(err) => err,
        };

        if attempt >= max_attempts {
            warn!(
                key = %key,
                attempt,
                kind = %ErrorKind(&err),
                "Generation failed, giving up: {err}"
            );
            return Err(RetryError::exhausted(attempt, &err));
        }

        let delay = backoff.next_delay();
        warn!(
            key = %key,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            kind = %ErrorKind(&err),
            "Generation attempt failed, retrying: {err}"
        );

        tokio::select! {
            _ = cancel.cancelled() => return Err(RetryError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(5), Duration::from_secs(10));
        assert_eq!(policy.delay_after(40), Duration::from_secs(10));
    }

    #[test]
    fn test_backoff_matches_policy() {
        let policy = RetryPolicy::default();
        let mut backoff = BackoffState::new(policy.clone());
        for failures in 1..=6 {
            assert_eq!(backoff.next_delay(), policy.delay_after(failures));
        }
    }

    #[test]
    fn test_validate() {
        assert!(RetryPolicy::default().validate().is_ok());
        let policy = RetryPolicy {
            max_attempts: 0,
            ..Default::default()
        };
        assert!(policy.validate().is_err());
    }

    #[test]
    fn test_key_display() {
        let key = GenerationKey::new("stream-1", KeyBucket::NextWindow);
        assert_eq!(key.to_string(), "stream-1/next-window");
    }
}
