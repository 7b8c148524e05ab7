//! Linear gain ramps used for fade-in and fade-out

use std::time::Duration;
use tokio::time::Instant;

/// Gain moving linearly from `from` to `to` over `duration`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeEnvelope {
    from: f32,
    to: f32,
    start: Instant,
    duration: Duration,
}

impl FadeEnvelope {
    pub fn new(from: f32, to: f32, duration: Duration, start: Instant) -> Self {
        Self {
            from: from.clamp(0.0, 1.0),
            to: to.clamp(0.0, 1.0),
            start,
            duration,
        }
    }

    /// Envelope holding `value` forever
    pub fn constant(value: f32, at: Instant) -> Self {
        Self::new(value, value, Duration::ZERO, at)
    }

    pub fn value_at(&self, now: Instant) -> f32 {
        if self.is_done(now) {
            return self.to;
        }
        let elapsed = now.saturating_duration_since(self.start).as_secs_f32();
        let t = elapsed / self.duration.as_secs_f32();
        self.from + (self.to - self.from) * t
    }

    pub fn is_done(&self, now: Instant) -> bool {
        self.duration.is_zero() || now >= self.start + self.duration
    }

    pub fn target(&self) -> f32 {
        self.to
    }

    /// Time left before the target is reached
    pub fn remaining(&self, now: Instant) -> Duration {
        (self.start + self.duration).saturating_duration_since(now)
    }
}
