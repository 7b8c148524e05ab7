//! Stream orchestration
//!
//! [`StreamController`] owns the timeline and its current index. Everything
//! else (playback, device sync, UI) reads snapshots or events and talks back
//! through [`advance`](StreamController::advance),
//! [`select_index`](StreamController::select_index) and
//! [`refresh`](StreamController::refresh).
//!
//! Generation runs are spawned tasks. At most one run is active per
//! controller, guarded by an atomic flag rather than by the observable state,
//! so two triggers evaluated back to back cannot both start a run.

use crate::chain::chain;
use crate::client::SegmentGenerator;
use crate::cold_start::{ColdStartProvider, InitialSegmentSource};
use crate::error::{Error, Result, RetryError};
use crate::events::{EventPublisher, StreamEvent, DEFAULT_EVENT_BUFFER};
use crate::fallback::SubstituteBatch;
use crate::merge::{merge, replace, MergePolicy};
use crate::models::{now_ms, EpochMs, MoodOverride, MoodStream, Segment};
use crate::retry::{GenerationKey, KeyBucket, RetryPolicy, RetryingGenerator, RunResult};
use crate::scheduler::{self, AutoGenerationScheduler, Trigger};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

/// Observable state of the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    Idle,
    LoadingInitial,
    Ready,
    Generating,
}

/// Result of [`StreamController::advance`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvanceOutcome {
    /// Moved to the next segment of the same stream
    Advanced { index: usize },
    /// Replaced the stream with the prefetched window
    Switched,
    /// Waiting for a generation run; the move happens when it lands
    Parked,
    /// Last segment and nothing being generated
    AtEnd,
    /// [`StreamController::load_initial`] has not run yet
    NotLoaded,
}

/// Point-in-time copy of the controller state
#[derive(Debug, Clone, PartialEq)]
pub struct StreamSnapshot {
    /// Empty while idle
    pub stream_id: String,
    pub segments: Vec<Segment>,
    pub current_index: usize,
    pub state: StreamState,
    pub is_loading: bool,
    pub is_generating_next_stream: bool,
    pub next_stream_available: bool,
    pub last_generation_failed: bool,
}

impl StreamSnapshot {
    pub fn current_segment(&self) -> Option<&Segment> {
        self.segments.get(self.current_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    LoadingInitial,
    Ready,
}

#[derive(Debug, Clone, Copy)]
enum Job {
    /// First extension past cold start, merged by policy
    Extend,
    /// Next display window, kept aside until the switch
    NextWindow,
    /// Replacement of everything after `keep` segments
    Refresh { keep: usize, generation: u64 },
}

#[derive(Debug, Clone)]
struct JobSpec {
    key: GenerationKey,
    job: Job,
    stream_id: String,
    start: EpochMs,
    count: usize,
}

struct ControllerState {
    phase: Phase,
    stream: Option<MoodStream>,
    next_window: Option<Vec<Segment>>,
    scheduler: AutoGenerationScheduler,
    mood_override: Option<MoodOverride>,
    active: Option<GenerationKey>,
    pending_advance: bool,
    last_generation_failed: bool,
    refresh_counter: u64,
    closed: bool,
}

struct Inner {
    policy: MergePolicy,
    source: Arc<dyn InitialSegmentSource>,
    generator: RetryingGenerator,
    substitute: SubstituteBatch,
    state: Mutex<ControllerState>,
    generating: AtomicBool,
    idle: watch::Sender<bool>,
    events: Mutex<EventPublisher<StreamEvent>>,
}

/// Orchestrating state machine of the mood stream
#[derive(Clone)]
pub struct StreamController {
    inner: Arc<Inner>,
}

impl fmt::Debug for StreamController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("StreamController")
            .field("phase", &state.phase)
            .field("stream_id", &state.stream.as_ref().map(|s| &s.stream_id))
            .field("generating", &self.is_generating())
            .finish()
    }
}

impl StreamController {
    /// Create a controller
    ///
    /// Both policies are validated. Nothing happens until
    /// [`load_initial`](Self::load_initial) is called.
    pub fn new(
        source: Arc<dyn InitialSegmentSource>,
        generator: Arc<dyn SegmentGenerator>,
        policy: MergePolicy,
        retry: RetryPolicy,
    ) -> Result<Self> {
        policy.validate()?;
        retry.validate()?;

        let (idle, _) = watch::channel(true);
        let state = ControllerState {
            phase: Phase::Idle,
            stream: None,
            next_window: None,
            scheduler: AutoGenerationScheduler::new(policy.clone()),
            mood_override: None,
            active: None,
            pending_advance: false,
            last_generation_failed: false,
            refresh_counter: 0,
            closed: false,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                policy,
                source,
                generator: RetryingGenerator::new(generator, retry),
                substitute: SubstituteBatch::new(),
                state: Mutex::new(state),
                generating: AtomicBool::new(false),
                idle,
                events: Mutex::new(EventPublisher::new()),
            }),
        })
    }

    /// Controller using the built-in cold-start sequence
    pub fn with_cold_start(
        generator: Arc<dyn SegmentGenerator>,
        policy: MergePolicy,
        retry: RetryPolicy,
    ) -> Result<Self> {
        Self::new(Arc::new(ColdStartProvider::new()), generator, policy, retry)
    }

    /// Receive controller events
    pub fn subscribe(&self) -> mpsc::Receiver<StreamEvent> {
        self.inner.events.lock().channel(DEFAULT_EVENT_BUFFER)
    }

    pub fn policy(&self) -> &MergePolicy {
        &self.inner.policy
    }

    /// Load the initial segments starting now
    pub fn load_initial(&self) -> Result<usize> {
        self.load_initial_at(now_ms())
    }

    /// Load the initial segments starting at `start_time`
    ///
    /// Replaces any existing stream. Returns the number of segments loaded.
    pub fn load_initial_at(&self, start_time: EpochMs) -> Result<usize> {
        let mut events = Vec::new();
        let (loaded, superseded) = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return Err(Error::Cancelled);
            }

            let previous_phase = state.phase;
            state.phase = Phase::LoadingInitial;

            let segments = chain(start_time, self.inner.source.initial_segments(start_time));
            if segments.is_empty() {
                state.phase = if previous_phase == Phase::Ready {
                    Phase::Ready
                } else {
                    Phase::Idle
                };
                return Err(Error::EmptyInitialSegments);
            }

            let stream = MoodStream::new(segments);
            info!(
                stream_id = %stream.stream_id,
                segments = stream.len(),
                "Initial segments loaded"
            );

            state.scheduler.retain_stream(&stream.stream_id);
            state.next_window = None;
            state.mood_override = None;
            state.pending_advance = false;
            state.last_generation_failed = false;
            events.push(segment_changed(&stream));

            let loaded = stream.len();
            state.stream = Some(stream);
            state.phase = Phase::Ready;
            (loaded, state.active.clone())
        };

        if let Some(key) = superseded {
            self.inner.generator.cancel(&key);
        }
        self.emit(events);
        self.check_generation();
        Ok(loaded)
    }

    /// Move to the next segment
    ///
    /// Switches to the prefetched stream at the last window position, and
    /// parks when the next segment is still being generated.
    pub fn advance(&self) -> AdvanceOutcome {
        let mut events = Vec::new();
        let outcome = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return AdvanceOutcome::NotLoaded;
            }
            self.advance_locked(&mut state, &mut events)
        };
        self.emit(events);
        if matches!(
            outcome,
            AdvanceOutcome::Advanced { .. } | AdvanceOutcome::Switched
        ) {
            self.check_generation();
        }
        outcome
    }

    /// Jump to `index`, clamped to the timeline
    ///
    /// Re-applies a held mood override to the newly selected segment. A
    /// request for the current index changes nothing. Returns the resulting
    /// index, `None` before load.
    pub fn select_index(&self, index: isize) -> Option<usize> {
        let mut events = Vec::new();
        let selected = {
            let mut state = self.inner.state.lock();
            if state.closed {
                return None;
            }
            let over = state.mood_override.clone();
            let stream = state.stream.as_mut()?;
            if stream.is_empty() {
                return None;
            }

            let clamped = index.clamp(0, stream.len() as isize - 1) as usize;
            if clamped == stream.current_index {
                return Some(clamped);
            }

            stream.current_index = clamped;
            if let Some(over) = &over {
                over.apply(&mut stream.segments[clamped]);
            }
            debug!(stream_id = %stream.stream_id, index = clamped, "Segment selected");
            events.push(segment_changed(stream));
            clamped
        };
        self.emit(events);
        self.check_generation();
        Some(selected)
    }

    /// Hold (or clear) a user edit of the current mood
    ///
    /// The edit patches the current segment right away and follows later
    /// [`select_index`](Self::select_index) calls. A natural advance drops it.
    pub fn set_mood_override(&self, mood_override: Option<MoodOverride>) {
        let mut events = Vec::new();
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            let over = mood_override.filter(|o| !o.is_empty());
            if let (Some(over), Some(stream)) = (&over, state.stream.as_mut()) {
                let index = stream.current_index;
                if let Some(segment) = stream.segments.get_mut(index) {
                    over.apply(segment);
                    events.push(segment_changed(stream));
                }
            }
            state.mood_override = over;
        }
        self.emit(events);
    }

    /// Regenerate everything after the current segment
    ///
    /// Any in-flight run is cancelled first. The timeline is truncated to
    /// `[0, current_index]` immediately; a full window is appended once the
    /// run succeeds. On failure the shorter timeline remains.
    pub async fn refresh(&self) -> Result<()> {
        loop {
            let active = {
                let state = self.inner.state.lock();
                if state.closed {
                    return Err(Error::Cancelled);
                }
                state.active.clone()
            };
            if let Some(key) = active {
                self.inner.generator.cancel(&key);
            }
            self.wait_generation_idle().await;
            if self.try_begin() {
                break;
            }
        }

        let prepared = {
            let mut state = self.inner.state.lock();
            self.prepare_refresh(&mut state)
        };

        match prepared {
            Ok(spec) => {
                self.spawn_job(spec);
                Ok(())
            }
            Err(err) => {
                self.release_flag();
                Err(err)
            }
        }
    }

    fn prepare_refresh(&self, state: &mut ControllerState) -> Result<JobSpec> {
        if state.closed {
            return Err(Error::Cancelled);
        }
        if state.phase != Phase::Ready {
            return Err(Error::other("stream is not loaded"));
        }
        let Some(stream) = state.stream.as_mut() else {
            return Err(Error::other("stream is not loaded"));
        };

        let keep = stream.current_index + 1;
        stream.segments.truncate(keep);
        let stream_id = stream.stream_id.clone();
        let start = stream.segments[keep - 1].end_time();

        state.refresh_counter += 1;
        let generation = state.refresh_counter;
        state.next_window = None;
        state.pending_advance = false;
        state
            .scheduler
            .disarm(&GenerationKey::new(stream_id.clone(), KeyBucket::NextWindow));

        let key = GenerationKey::new(
            stream_id.clone(),
            KeyBucket::Refresh {
                after_index: keep - 1,
                generation,
            },
        );
        state.active = Some(key.clone());
        info!(stream_id = %stream_id, keep, "Refreshing stream");

        Ok(JobSpec {
            key,
            job: Job::Refresh { keep, generation },
            stream_id,
            start,
            count: self.inner.policy.window_size,
        })
    }

    /// Evaluate the generation triggers for the current position
    ///
    /// Called automatically whenever the index or the timeline length
    /// changes. Returns `true` if a run was started.
    pub fn check_generation(&self) -> bool {
        if self.inner.generating.load(Ordering::Acquire) {
            return false;
        }

        let spec = {
            let mut state = self.inner.state.lock();
            if state.closed || state.phase != Phase::Ready {
                return false;
            }
            let Some(stream) = state.stream.as_ref() else {
                return false;
            };
            let stream_id = stream.stream_id.clone();
            let total = stream.len();
            let index = stream.current_index;
            let last_end = stream.last_end_time().unwrap_or_else(now_ms);
            let window_end = stream
                .segments
                .get(total.min(self.inner.policy.window_size).saturating_sub(1))
                .map_or(last_end, Segment::end_time);

            let Some((key, trigger)) = state.scheduler.poll(&stream_id, total, index) else {
                return false;
            };
            if !self.try_begin() {
                state.scheduler.disarm(&key);
                return false;
            }

            let (job, start) = match trigger {
                Trigger::FirstExtension { .. } => (Job::Extend, last_end),
                Trigger::NextWindow { .. } => (Job::NextWindow, window_end),
            };
            debug!(key = %key, index, total, ?trigger, "Generation triggered");
            state.active = Some(key.clone());

            JobSpec {
                key,
                job,
                stream_id,
                start,
                count: trigger.count(),
            }
        };

        self.spawn_job(spec);
        true
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.inner.state.lock();
        let generating = self.is_generating();
        let (stream_id, segments, current_index) = match &state.stream {
            Some(stream) => (
                stream.stream_id.clone(),
                stream.segments.clone(),
                stream.current_index,
            ),
            None => (String::new(), Vec::new(), 0),
        };
        StreamSnapshot {
            stream_id,
            segments,
            current_index,
            state: self.state_of(&state, generating),
            is_loading: state.phase == Phase::LoadingInitial,
            is_generating_next_stream: generating,
            next_stream_available: state.next_window.is_some(),
            last_generation_failed: state.last_generation_failed,
        }
    }

    pub fn state(&self) -> StreamState {
        let state = self.inner.state.lock();
        self.state_of(&state, self.is_generating())
    }

    pub fn current_segment(&self) -> Option<Segment> {
        let state = self.inner.state.lock();
        state
            .stream
            .as_ref()
            .and_then(|s| s.current_segment().cloned())
    }

    pub fn current_index(&self) -> Option<usize> {
        let state = self.inner.state.lock();
        state.stream.as_ref().map(|s| s.current_index)
    }

    /// Whether a generation run is active
    pub fn is_generating(&self) -> bool {
        self.inner.generating.load(Ordering::Acquire)
    }

    /// Resolve once no generation run is active
    pub async fn wait_generation_idle(&self) {
        let mut rx = self.inner.idle.subscribe();
        let _ = rx.wait_for(|idle| *idle).await;
    }

    /// Tear down: cancel in-flight runs and ignore their results
    pub fn shutdown(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending_advance = false;
        }
        self.inner.generator.shutdown();
        info!("Stream controller shut down");
    }

    fn state_of(&self, state: &ControllerState, generating: bool) -> StreamState {
        match state.phase {
            Phase::Idle => StreamState::Idle,
            Phase::LoadingInitial => StreamState::LoadingInitial,
            Phase::Ready if generating => StreamState::Generating,
            Phase::Ready => StreamState::Ready,
        }
    }

    fn try_begin(&self) -> bool {
        let acquired = self
            .inner
            .generating
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if acquired {
            self.inner.idle.send_replace(false);
        }
        acquired
    }

    fn release_flag(&self) {
        self.inner.generating.store(false, Ordering::Release);
        self.inner.idle.send_replace(true);
    }

    fn emit(&self, events: Vec<StreamEvent>) {
        if events.is_empty() {
            return;
        }
        let mut publisher = self.inner.events.lock();
        for event in events {
            publisher.publish(event);
        }
    }

    fn spawn_job(&self, spec: JobSpec) {
        self.emit(vec![StreamEvent::GenerationStateChanged { generating: true }]);
        let run = self
            .inner
            .generator
            .start(spec.key.clone(), spec.start, spec.count);
        let controller = self.clone();
        tokio::spawn(async move {
            let result = run.await;
            controller.complete_job(spec, result);
        });
    }

    fn complete_job(&self, spec: JobSpec, result: RunResult) {
        let mut events = Vec::new();
        let mut succeeded = false;
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                drop(state);
                self.release_flag();
                return;
            }
            if state.active.as_ref() == Some(&spec.key) {
                state.active = None;
            }

            let landed = match result {
                Ok(segments) => {
                    state.last_generation_failed = false;
                    succeeded = true;
                    self.apply_batch(&mut state, &spec, segments, &mut events)
                }
                Err(RetryError::Cancelled) => {
                    debug!(key = %spec.key, "Generation cancelled");
                    state.scheduler.disarm(&spec.key);
                    false
                }
                Err(error) => {
                    state.last_generation_failed = true;
                    let substituted = error.is_malformed() && self.is_current(&state, &spec);
                    let landed = if substituted {
                        warn!(key = %spec.key, "Using substitute segments after malformed responses");
                        let batch = self.inner.substitute.generate(spec.start, spec.count);
                        self.apply_batch(&mut state, &spec, batch, &mut events)
                    } else {
                        state.scheduler.disarm(&spec.key);
                        false
                    };
                    events.push(StreamEvent::GenerationFailed {
                        key: spec.key.to_string(),
                        error,
                        substituted,
                    });
                    landed
                }
            };

            if state.pending_advance {
                state.pending_advance = false;
                if landed {
                    self.advance_locked(&mut state, &mut events);
                }
            }
        }

        self.release_flag();
        events.push(StreamEvent::GenerationStateChanged { generating: false });
        self.emit(events);

        // A failed run waits for the next index change before retrying.
        if succeeded {
            self.check_generation();
        }
    }

    fn is_current(&self, state: &ControllerState, spec: &JobSpec) -> bool {
        let same_stream = state
            .stream
            .as_ref()
            .is_some_and(|s| s.stream_id == spec.stream_id);
        match spec.job {
            Job::Refresh { generation, .. } => same_stream && generation == state.refresh_counter,
            _ => same_stream,
        }
    }

    /// Put a batch in place; returns whether it was applied
    fn apply_batch(
        &self,
        state: &mut ControllerState,
        spec: &JobSpec,
        segments: Vec<Segment>,
        events: &mut Vec<StreamEvent>,
    ) -> bool {
        if !self.is_current(state, spec) {
            debug!(key = %spec.key, "Discarding batch for a superseded stream");
            return false;
        }

        match spec.job {
            Job::NextWindow => {
                info!(
                    stream_id = %spec.stream_id,
                    segments = segments.len(),
                    "Next window ready"
                );
                events.push(StreamEvent::NextStreamReady {
                    stream_id: spec.stream_id.clone(),
                    segments: segments.len(),
                });
                state.next_window = Some(segments);
            }
            Job::Extend => {
                let Some(stream) = state.stream.as_mut() else {
                    return false;
                };
                stream.segments = merge(&stream.segments, segments, &self.inner.policy);
                info!(stream_id = %stream.stream_id, total = stream.len(), "Timeline extended");
                events.push(StreamEvent::TimelineExtended {
                    stream_id: stream.stream_id.clone(),
                    total: stream.len(),
                });
            }
            Job::Refresh { keep, .. } => {
                let Some(stream) = state.stream.as_mut() else {
                    return false;
                };
                stream.segments.truncate(keep);
                let start = stream.last_end_time().unwrap_or(spec.start);
                stream.segments.extend(chain(start, segments));
                info!(stream_id = %stream.stream_id, total = stream.len(), "Timeline refreshed");
                events.push(StreamEvent::TimelineExtended {
                    stream_id: stream.stream_id.clone(),
                    total: stream.len(),
                });
            }
        }
        true
    }

    fn advance_locked(
        &self,
        state: &mut ControllerState,
        events: &mut Vec<StreamEvent>,
    ) -> AdvanceOutcome {
        if state.phase != Phase::Ready {
            return AdvanceOutcome::NotLoaded;
        }
        let next_ready = state.next_window.is_some();
        let Some(stream) = state.stream.as_mut() else {
            return AdvanceOutcome::NotLoaded;
        };

        let index = stream.current_index;
        if scheduler::should_switch(&self.inner.policy, index, next_ready) {
            return self.switch_locked(state, events);
        }

        if index + 1 < stream.len() {
            stream.current_index += 1;
            debug!(stream_id = %stream.stream_id, index = index + 1, "Advanced");
            events.push(segment_changed(stream));
            state.mood_override = None;
            return AdvanceOutcome::Advanced { index: index + 1 };
        }

        if self.is_generating() {
            debug!(stream_id = %stream.stream_id, index, "Advance parked until generation lands");
            state.pending_advance = true;
            return AdvanceOutcome::Parked;
        }

        AdvanceOutcome::AtEnd
    }

    fn switch_locked(
        &self,
        state: &mut ControllerState,
        events: &mut Vec<StreamEvent>,
    ) -> AdvanceOutcome {
        let (Some(window), Some(current)) = (state.next_window.take(), state.stream.as_ref())
        else {
            return AdvanceOutcome::AtEnd;
        };

        let previous = current.stream_id.clone();
        let start = current
            .current_segment()
            .map_or_else(now_ms, Segment::end_time);
        let stream = replace(window, start);
        info!(previous = %previous, stream_id = %stream.stream_id, "Switched to next stream");

        state.scheduler.retain_stream(&stream.stream_id);
        state.mood_override = None;
        events.push(StreamEvent::StreamSwitched {
            previous,
            stream_id: stream.stream_id.clone(),
        });
        events.push(segment_changed(&stream));
        state.stream = Some(stream);
        AdvanceOutcome::Switched
    }
}

fn segment_changed(stream: &MoodStream) -> StreamEvent {
    StreamEvent::SegmentChanged {
        stream_id: stream.stream_id.clone(),
        index: stream.current_index,
        segment: stream.segments[stream.current_index].clone(),
    }
}
