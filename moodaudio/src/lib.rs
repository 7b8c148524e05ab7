//! # moodaudio
//!
//! Playback of mood stream segments: one music track per segment,
//! cross-faded at segment boundaries, with exactly one completion signal per
//! segment.
//!
//! ```no_run
//! use moodaudio::{MemoryVolumeStore, PlaybackConfig, PlaybackEngine, SilentBackend};
//! use moodstream::ColdStartProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (engine, mut ended) = PlaybackEngine::new(
//!         Arc::new(SilentBackend::new()),
//!         Arc::new(MemoryVolumeStore::default()),
//!         PlaybackConfig::default(),
//!     );
//!
//!     let segments = ColdStartProvider.segments();
//!     engine.play(&segments[0]);
//!     if let Some(done) = ended.recv().await {
//!         println!("{} finished", done.segment.mood_id);
//!     }
//! }
//! ```

pub mod backend;
pub mod completion;
pub mod config;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod events;
#[cfg(feature = "rodio")]
pub mod rodio_backend;
pub mod volume;

pub use backend::{AudioBackend, Deck, DeckId, EndSignal, SilentBackend, SilentDeck};
pub use completion::CompletionLatch;
pub use config::PlaybackConfig;
pub use engine::{DeckGain, PlaybackEngine, Progress};
pub use envelope::FadeEnvelope;
pub use error::{AudioError, Result};
pub use events::{PlaybackEvent, SegmentEnded, SegmentKey};
#[cfg(feature = "rodio")]
pub use rodio_backend::RodioBackend;
pub use volume::{FileVolumeStore, MemoryVolumeStore, VolumeStore, DEFAULT_VOLUME};
