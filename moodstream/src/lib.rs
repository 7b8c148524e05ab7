//! # moodstream
//!
//! Segment pipeline of an ambient mood stream: an ordered, gapless timeline
//! of short segments, each describing a light color, a scent and a music
//! track.
//!
//! The pipeline covers:
//! - [`ColdStartProvider`]: three fixed segments available with no network
//! - [`chain()`]: re-timestamping so every segment starts when the previous
//!   one ends
//! - [`GenerationClient`]: one call to the external generation service
//! - [`RetryingGenerator`]: bounded exponential backoff and in-flight
//!   deduplication
//! - [`merge()`]: stitching generated batches onto the timeline
//! - [`AutoGenerationScheduler`]: deciding when to ask for more
//! - [`StreamController`]: the state machine owning the timeline
//!
//! ## Example
//!
//! ```no_run
//! use moodstream::{GenerationClient, MergePolicy, RetryPolicy, StreamController};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GenerationClient::builder()
//!         .base_url("http://localhost:3000")
//!         .build()?;
//!     let controller = StreamController::with_cold_start(
//!         Arc::new(client),
//!         MergePolicy::default(),
//!         RetryPolicy::default(),
//!     )?;
//!
//!     controller.load_initial()?;
//!     if let Some(segment) = controller.current_segment() {
//!         println!("Now: {}", segment.mood.display_name);
//!     }
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod chain;
pub mod client;
pub mod cold_start;
pub mod color;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod fallback;
pub mod merge;
pub mod models;
pub mod retry;
pub mod scheduler;

pub use catalog::{StaticTrackCatalog, TrackCatalog, TrackId};
pub use chain::chain;
pub use client::{ClientBuilder, GenerationClient, SegmentGenerator};
pub use cold_start::{ColdStartProvider, InitialSegmentSource};
pub use color::hex_to_rgb;
pub use config::{GenerationConfig, MoodStreamConfig};
pub use controller::{AdvanceOutcome, StreamController, StreamSnapshot, StreamState};
pub use error::{Error, Result, RetryError};
pub use events::{EventPublisher, StreamEvent};
pub use fallback::SubstituteBatch;
pub use merge::{merge, MergePolicy};
pub use models::{
    BackgroundParams, DurationMs, EpochMs, MoodOverride, MoodSnapshot, MoodStream, Segment,
    TrackRef,
};
pub use retry::{GenerationKey, KeyBucket, RetryPolicy, RetryingGenerator};
pub use scheduler::{AutoGenerationScheduler, Trigger};
