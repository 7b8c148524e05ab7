//! Audio output abstraction
//!
//! An [`AudioBackend`] opens one [`Deck`] per track. The engine keeps two
//! decks alive during a cross-fade and drives their gains itself, so a deck
//! only needs transport controls, a gain and a position.
//!
//! Decks report their natural end of media through the [`EndSignal`] they
//! were opened with. The engine also samples positions, so a backend whose
//! end event is unreliable still completes segments.

use crate::error::{AudioError, Result};
use moodstream::TrackRef;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub type DeckId = u64;

/// End-of-media notification bound to one deck
#[derive(Debug, Clone)]
pub struct EndSignal {
    deck: DeckId,
    tx: mpsc::UnboundedSender<DeckId>,
}

impl EndSignal {
    pub fn new(deck: DeckId, tx: mpsc::UnboundedSender<DeckId>) -> Self {
        Self { deck, tx }
    }

    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn notify(&self) {
        let _ = self.tx.send(self.deck);
    }
}

pub trait AudioBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Load `track`, paused at position zero with full gain
    fn open(&self, track: &TrackRef, end: EndSignal) -> Result<Box<dyn Deck>>;
}

/// One loaded track
pub trait Deck: Send {
    /// Start or resume output. Fails with [`AudioError::PlaybackBlocked`]
    /// when the platform requires a user gesture and `user_initiated` is
    /// false.
    fn play(&mut self, user_initiated: bool) -> Result<()>;
    fn pause(&mut self);
    fn stop(&mut self);
    fn set_gain(&mut self, gain: f32);
    fn gain(&self) -> f32;
    /// Position in the media
    fn position(&self) -> Duration;
    fn seek(&mut self, position: Duration) -> Result<()>;
    fn is_playing(&self) -> bool;
}

/// Map a track `fileUrl` (`/album/Carol/Carol_01.mp3`) below `root`
///
/// Remote URLs and paths escaping the root are rejected.
pub fn resolve_media_path(root: &Path, file_url: &str) -> Option<PathBuf> {
    if file_url.contains("://") || file_url.is_empty() {
        return None;
    }
    let relative = Path::new(file_url.trim_start_matches('/'));
    if relative
        .components()
        .any(|c| !matches!(c, Component::Normal(_)))
    {
        return None;
    }
    Some(root.join(relative))
}

/// Deck that plays silence on the tokio clock
///
/// Used for segments without a track, for tracks that cannot be opened and
/// by [`SilentBackend`].
pub struct SilentDeck {
    length: Duration,
    position: Duration,
    resumed_at: Option<Instant>,
    gain: f32,
    require_gesture: bool,
    end: Option<EndSignal>,
    timer: Option<JoinHandle<()>>,
}

impl SilentDeck {
    pub fn new(length: Duration, end: Option<EndSignal>) -> Self {
        Self {
            length,
            position: Duration::ZERO,
            resumed_at: None,
            gain: 1.0,
            require_gesture: false,
            end,
            timer: None,
        }
    }

    pub fn requiring_gesture(mut self, require: bool) -> Self {
        self.require_gesture = require;
        self
    }

    pub fn length(&self) -> Duration {
        self.length
    }

    fn schedule_end(&mut self) {
        self.cancel_end();
        let Some(end) = self.end.clone() else {
            return;
        };
        // Without a runtime only the sampler can complete the segment.
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let remaining = self.length.saturating_sub(self.position());
        self.timer = Some(handle.spawn(async move {
            tokio::time::sleep(remaining).await;
            end.notify();
        }));
    }

    fn cancel_end(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Deck for SilentDeck {
    fn play(&mut self, user_initiated: bool) -> Result<()> {
        if self.require_gesture && !user_initiated {
            return Err(AudioError::PlaybackBlocked);
        }
        if self.resumed_at.is_none() {
            self.resumed_at = Some(Instant::now());
            self.schedule_end();
        }
        Ok(())
    }

    fn pause(&mut self) {
        self.position = self.position();
        self.resumed_at = None;
        self.cancel_end();
    }

    fn stop(&mut self) {
        self.pause();
        self.position = Duration::ZERO;
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain.clamp(0.0, 1.0);
    }

    fn gain(&self) -> f32 {
        self.gain
    }

    fn position(&self) -> Duration {
        let running = self
            .resumed_at
            .map_or(Duration::ZERO, |t| Instant::now().saturating_duration_since(t));
        (self.position + running).min(self.length)
    }

    fn seek(&mut self, position: Duration) -> Result<()> {
        self.position = position.min(self.length);
        if self.resumed_at.is_some() {
            self.resumed_at = Some(Instant::now());
            self.schedule_end();
        }
        Ok(())
    }

    fn is_playing(&self) -> bool {
        self.resumed_at.is_some()
    }
}

impl Drop for SilentDeck {
    fn drop(&mut self) {
        self.cancel_end();
    }
}

/// Backend producing [`SilentDeck`]s as long as each track
///
/// Serves headless runs and tests. It can mimic a platform that refuses
/// to start audio without a user gesture, and one whose end-of-media event
/// never arrives.
#[derive(Debug, Clone)]
pub struct SilentBackend {
    require_gesture: bool,
    end_events: bool,
}

impl SilentBackend {
    pub fn new() -> Self {
        Self {
            require_gesture: false,
            end_events: true,
        }
    }

    pub fn requiring_gesture(mut self) -> Self {
        self.require_gesture = true;
        self
    }

    pub fn without_end_events(mut self) -> Self {
        self.end_events = false;
        self
    }
}

impl Default for SilentBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SilentBackend {
    fn name(&self) -> &str {
        "silent"
    }

    fn open(&self, track: &TrackRef, end: EndSignal) -> Result<Box<dyn Deck>> {
        let deck = SilentDeck::new(
            Duration::from_millis(track.duration_ms),
            self.end_events.then_some(end),
        )
        .requiring_gesture(self.require_gesture);
        Ok(Box::new(deck))
    }
}
