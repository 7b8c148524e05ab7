//! Cross-fading playback engine
//!
//! One deck plays the current segment. When another segment is played the
//! current deck is moved to the fading list and ramps down over its track's
//! fade-out while the new deck ramps up over its fade-in. A background loop
//! updates gains, samples progress and stops decks whose fade completed.
//!
//! Segment completion has two sources that converge on a
//! [`CompletionLatch`]: the deck's end-of-media signal and the sampler seeing
//! the position reach the segment duration. Each segment therefore produces
//! exactly one [`SegmentEnded`].

use crate::backend::{AudioBackend, Deck, DeckId, EndSignal, SilentDeck};
use crate::completion::CompletionLatch;
use crate::config::PlaybackConfig;
use crate::envelope::FadeEnvelope;
use crate::error::AudioError;
use crate::events::{PlaybackEvent, SegmentEnded, SegmentKey};
use crate::volume::{initial_volume, VolumeStore};
use moodstream::events::DEFAULT_EVENT_BUFFER;
use moodstream::{EventPublisher, Segment};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Position within the current segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub position_ms: u64,
    pub duration_ms: u64,
}

/// Fade gain of one deck, before the user volume is applied
#[derive(Debug, Clone, PartialEq)]
pub struct DeckGain {
    pub segment: SegmentKey,
    pub gain: f32,
    pub fading_out: bool,
}

struct LoadedDeck {
    id: DeckId,
    segment: SegmentKey,
    deck: Box<dyn Deck>,
    envelope: FadeEnvelope,
    /// Media position at which the segment starts
    origin: Duration,
    length: Duration,
    fade_in: Duration,
    fade_out: Duration,
    latch: CompletionLatch,
}

impl LoadedDeck {
    fn progress(&self) -> Duration {
        self.deck
            .position()
            .saturating_sub(self.origin)
            .min(self.length)
    }

    fn report(&self) -> Progress {
        Progress {
            position_ms: self.progress().as_millis() as u64,
            duration_ms: self.length.as_millis() as u64,
        }
    }
}

struct FadingDeck {
    segment: SegmentKey,
    deck: Box<dyn Deck>,
    envelope: FadeEnvelope,
}

struct EngineState {
    active: Option<LoadedDeck>,
    fading: Vec<FadingDeck>,
    volume: f32,
    playing: bool,
    blocked: bool,
    next_deck: DeckId,
    closed: bool,
}

struct Inner {
    backend: Arc<dyn AudioBackend>,
    volume_store: Arc<dyn VolumeStore>,
    config: PlaybackConfig,
    state: Mutex<EngineState>,
    events: Mutex<EventPublisher<PlaybackEvent>>,
    ended_tx: mpsc::UnboundedSender<SegmentEnded>,
    end_tx: mpsc::UnboundedSender<DeckId>,
    shutdown: CancellationToken,
}

/// Handle on the playback engine
///
/// Cloning is cheap; all clones drive the same decks.
#[derive(Clone)]
pub struct PlaybackEngine {
    inner: Arc<Inner>,
}

impl PlaybackEngine {
    /// Create the engine and start its sampling loop
    ///
    /// Must be called from within a tokio runtime. The returned receiver
    /// yields one [`SegmentEnded`] per completed segment; its consumer is
    /// expected to advance the stream.
    pub fn new(
        backend: Arc<dyn AudioBackend>,
        volume_store: Arc<dyn VolumeStore>,
        config: PlaybackConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SegmentEnded>) {
        let volume = initial_volume(volume_store.as_ref(), config.initial_volume);
        let (ended_tx, ended_rx) = mpsc::unbounded_channel();
        let (end_tx, end_rx) = mpsc::unbounded_channel();
        let period = config.tick_interval();

        let inner = Arc::new(Inner {
            backend,
            volume_store,
            config,
            state: Mutex::new(EngineState {
                active: None,
                fading: Vec::new(),
                volume,
                playing: false,
                blocked: false,
                next_deck: 0,
                closed: false,
            }),
            events: Mutex::new(EventPublisher::new()),
            ended_tx,
            end_tx,
            shutdown: CancellationToken::new(),
        });

        info!(
            backend = inner.backend.name(),
            volume,
            tick_ms = period.as_millis() as u64,
            "Playback engine started"
        );
        tokio::spawn(run_loop(
            Arc::downgrade(&inner),
            end_rx,
            inner.shutdown.clone(),
            period,
        ));

        (Self { inner }, ended_rx)
    }

    pub fn subscribe(&self) -> mpsc::Receiver<PlaybackEvent> {
        self.inner.events.lock().channel(DEFAULT_EVENT_BUFFER)
    }

    /// Play `segment`, cross-fading from whatever is playing
    ///
    /// Playing the segment that is already loaded resumes it. A blocked
    /// start is not an error: the engine stays paused until [`toggle`]
    /// is called from a user gesture.
    ///
    /// [`toggle`]: PlaybackEngine::toggle
    pub fn play(&self, segment: &Segment) {
        self.inner.play(segment);
    }

    pub fn pause(&self) {
        self.inner.pause();
    }

    /// Switch between playing and paused on behalf of the user
    ///
    /// Returns whether the engine is now playing.
    pub fn toggle(&self) -> bool {
        self.inner.toggle()
    }

    /// Move within the current segment, clamped to `[0, duration]`
    pub fn seek(&self, time_ms: i64) -> Option<Progress> {
        self.inner.seek(time_ms)
    }

    /// Set and persist the output level, clamped to `0..=1`
    pub fn set_volume(&self, level: f32) -> f32 {
        self.inner.set_volume(level)
    }

    pub fn volume(&self) -> f32 {
        self.inner.state.lock().volume
    }

    pub fn progress(&self) -> Option<Progress> {
        self.inner.state.lock().active.as_ref().map(LoadedDeck::report)
    }

    /// Whether the current segment has entered its fade-out window
    pub fn is_fading_out(&self) -> bool {
        let state = self.inner.state.lock();
        state.active.as_ref().is_some_and(|active| {
            !active.fade_out.is_zero()
                && active.length.saturating_sub(active.progress()) <= active.fade_out
        })
    }

    /// Fade gains of the current deck followed by the outgoing ones
    pub fn gains(&self) -> Vec<DeckGain> {
        let now = Instant::now();
        let state = self.inner.state.lock();
        let current = state.active.iter().map(|active| DeckGain {
            segment: active.segment.clone(),
            gain: active.envelope.value_at(now),
            fading_out: false,
        });
        let outgoing = state.fading.iter().map(|fading| DeckGain {
            segment: fading.segment.clone(),
            gain: fading.envelope.value_at(now),
            fading_out: true,
        });
        current.chain(outgoing).collect()
    }

    pub fn current_segment(&self) -> Option<SegmentKey> {
        let state = self.inner.state.lock();
        state.active.as_ref().map(|active| active.segment.clone())
    }

    pub fn is_playing(&self) -> bool {
        self.inner.state.lock().playing
    }

    /// Whether output is waiting for a user gesture
    pub fn is_blocked(&self) -> bool {
        self.inner.state.lock().blocked
    }

    /// Stop every deck and unload the current segment
    pub fn stop(&self) {
        let mut state = self.inner.state.lock();
        stop_all(&mut state);
    }

    /// Stop playback and the sampling loop
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            state.closed = true;
            stop_all(&mut state);
        }
        self.inner.shutdown.cancel();
        info!("Playback engine stopped");
    }
}

impl Inner {
    fn publish(&self, event: PlaybackEvent) {
        self.events.lock().publish(event);
    }

    fn play(&self, segment: &Segment) {
        let key = SegmentKey::of(segment);
        let now = Instant::now();

        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }

        let loaded = state.active.as_ref().is_some_and(|active| active.segment == key);
        if loaded {
            trace!(mood_id = %key.mood_id, "Segment already loaded");
            if state.playing {
                return;
            }
        } else {
            self.retire_active(state, &key, now);
            let deck = self.load(state, segment, key.clone());
            state.active = Some(deck);
            self.publish(PlaybackEvent::Started {
                segment: key,
                title: segment.music_track.as_ref().map(|t| t.title.clone()),
            });
        }

        // A fresh deck always needs its own start and fade-in.
        self.start(state, false);
    }

    /// Move the current deck to the fading list
    fn retire_active(&self, state: &mut EngineState, next: &SegmentKey, now: Instant) {
        let Some(mut previous) = state.active.take() else {
            return;
        };

        if !previous.deck.is_playing() {
            previous.deck.stop();
            return;
        }

        let from = previous.envelope.value_at(now);
        debug!(
            from = %previous.segment.mood_id,
            to = %next.mood_id,
            fade_out_ms = previous.fade_out.as_millis() as u64,
            "Cross-fade started"
        );
        self.publish(PlaybackEvent::CrossfadeStarted {
            from: previous.segment.clone(),
            to: next.clone(),
        });
        state.fading.push(FadingDeck {
            segment: previous.segment,
            deck: previous.deck,
            envelope: FadeEnvelope::new(from, 0.0, previous.fade_out, now),
        });
    }

    fn load(&self, state: &mut EngineState, segment: &Segment, key: SegmentKey) -> LoadedDeck {
        let id = state.next_deck;
        state.next_deck += 1;

        let end = EndSignal::new(id, self.end_tx.clone());
        let length = Duration::from_millis(segment.duration);
        let silent = |end: EndSignal| -> Box<dyn Deck> { Box::new(SilentDeck::new(length, Some(end))) };

        let (mut deck, fade_in, fade_out) = match &segment.music_track {
            Some(track) => match self.backend.open(track, end.clone()) {
                Ok(mut deck) => {
                    let offset = Duration::from_millis(track.start_offset_ms);
                    if !offset.is_zero() {
                        if let Err(e) = deck.seek(offset) {
                            warn!(track = %track.file_url, "Cannot seek to start offset: {}", e);
                        }
                    }
                    (
                        deck,
                        Duration::from_millis(track.fade_in_ms),
                        Duration::from_millis(track.fade_out_ms),
                    )
                }
                Err(e) => {
                    warn!(
                        track = %track.file_url,
                        "Cannot open track, segment plays silently: {}", e
                    );
                    (silent(end), self.config.fade_in(), self.config.fade_out())
                }
            },
            None => {
                debug!(mood_id = %key.mood_id, "Segment has no track");
                (silent(end), self.config.fade_in(), self.config.fade_out())
            }
        };

        deck.set_gain(0.0);
        LoadedDeck {
            id,
            segment: key,
            origin: deck.position(),
            deck,
            envelope: FadeEnvelope::constant(0.0, Instant::now()),
            length,
            fade_in,
            fade_out,
            latch: CompletionLatch::new(),
        }
    }

    /// Start output of the current deck, ramping up from its current gain
    fn start(&self, state: &mut EngineState, user_initiated: bool) -> bool {
        let now = Instant::now();
        let volume = state.volume;
        let Some(active) = state.active.as_mut() else {
            return false;
        };

        match active.deck.play(user_initiated) {
            Ok(()) => {
                let gain = active.envelope.value_at(now);
                if active.envelope.is_done(now) && active.envelope.target() < 1.0 {
                    let ramp = active.fade_in.mul_f32(1.0 - gain);
                    active.envelope = FadeEnvelope::new(gain, 1.0, ramp, now);
                }
                active.deck.set_gain(gain * volume);
                let resumed = state.blocked || active.progress() > Duration::ZERO;
                state.playing = true;
                state.blocked = false;
                if resumed {
                    self.publish(PlaybackEvent::Resumed);
                }
                true
            }
            Err(AudioError::PlaybackBlocked) => {
                debug!(mood_id = %active.segment.mood_id, "Playback blocked until a user gesture");
                state.playing = false;
                if !state.blocked {
                    state.blocked = true;
                    self.publish(PlaybackEvent::Blocked);
                }
                false
            }
            Err(e) => {
                warn!(mood_id = %active.segment.mood_id, "Playback failed to start: {}", e);
                state.playing = false;
                false
            }
        }
    }

    fn pause(&self) {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if !state.playing {
            return;
        }

        if let Some(active) = state.active.as_mut() {
            active.deck.pause();
            active.envelope = FadeEnvelope::constant(active.envelope.value_at(now), now);
        }
        for mut fading in state.fading.drain(..) {
            fading.deck.stop();
            self.publish(PlaybackEvent::CrossfadeFinished {
                segment: fading.segment,
            });
        }
        state.playing = false;
        self.publish(PlaybackEvent::Paused);
    }

    fn toggle(&self) -> bool {
        if self.state.lock().playing {
            self.pause();
            return false;
        }
        let mut guard = self.state.lock();
        if guard.closed {
            return false;
        }
        self.start(&mut guard, true)
    }

    fn seek(&self, time_ms: i64) -> Option<Progress> {
        let mut guard = self.state.lock();
        let active = guard.active.as_mut()?;

        let target = Duration::from_millis(time_ms.max(0) as u64).min(active.length);
        if let Err(e) = active.deck.seek(active.origin + target) {
            warn!(mood_id = %active.segment.mood_id, "Seek failed: {}", e);
        }
        let progress = active.report();
        self.publish(PlaybackEvent::Progress {
            position_ms: progress.position_ms,
            duration_ms: progress.duration_ms,
        });
        Some(progress)
    }

    fn set_volume(&self, level: f32) -> f32 {
        let now = Instant::now();
        let level = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            if !level.is_finite() {
                return state.volume;
            }
            let level = level.clamp(0.0, 1.0);
            state.volume = level;
            if let Some(active) = state.active.as_mut() {
                active.deck.set_gain(active.envelope.value_at(now) * level);
            }
            for fading in state.fading.iter_mut() {
                fading.deck.set_gain(fading.envelope.value_at(now) * level);
            }
            level
        };

        if let Err(e) = self.volume_store.save(level) {
            warn!("Cannot persist volume: {}", e);
        }
        self.publish(PlaybackEvent::VolumeChanged { volume: level });
        level
    }

    /// Sampler: apply gains, retire silent decks, report progress
    fn tick(&self) {
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return;
        }
        let volume = state.volume;

        let mut finished = Vec::new();
        state.fading.retain_mut(|fading| {
            fading.deck.set_gain(fading.envelope.value_at(now) * volume);
            if fading.envelope.is_done(now) {
                fading.deck.stop();
                finished.push(fading.segment.clone());
                false
            } else {
                true
            }
        });
        for segment in finished {
            debug!(mood_id = %segment.mood_id, "Cross-fade finished");
            self.publish(PlaybackEvent::CrossfadeFinished { segment });
        }

        let Some(active) = state.active.as_mut() else {
            return;
        };
        active.deck.set_gain(active.envelope.value_at(now) * volume);
        if !state.playing {
            return;
        }

        let progress = active.report();
        self.publish(PlaybackEvent::Progress {
            position_ms: progress.position_ms,
            duration_ms: progress.duration_ms,
        });
        if active.progress() >= active.length {
            self.complete(active, "sampler");
        }
    }

    fn on_end_of_media(&self, deck: DeckId) {
        let state = self.state.lock();
        match state.active.as_ref() {
            Some(active) if active.id == deck && !state.closed => {
                self.complete(active, "end-of-media")
            }
            _ => trace!(deck, "End of a retired deck"),
        }
    }

    fn complete(&self, active: &LoadedDeck, source: &str) {
        if !active.latch.fire() {
            return;
        }
        info!(
            mood_id = %active.segment.mood_id,
            start_time = active.segment.start_time,
            source,
            "Segment ended"
        );
        let ended = SegmentEnded {
            segment: active.segment.clone(),
        };
        let _ = self.ended_tx.send(ended.clone());
        self.publish(PlaybackEvent::SegmentEnded(ended));
    }
}

fn stop_all(state: &mut EngineState) {
    if let Some(mut active) = state.active.take() {
        active.deck.stop();
    }
    for mut fading in state.fading.drain(..) {
        fading.deck.stop();
    }
    state.playing = false;
}

async fn run_loop(
    inner: Weak<Inner>,
    mut end_rx: mpsc::UnboundedReceiver<DeckId>,
    shutdown: CancellationToken,
    period: Duration,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            Some(deck) = end_rx.recv() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.on_end_of_media(deck);
            }
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else { break };
                inner.tick();
            }
        }
    }
    debug!("Playback loop exited");
}
