//! # mooddevices
//!
//! Keeps the room's light, scent diffuser and speaker in line with the
//! segment currently playing.
//!
//! Rapid successive mood changes (skipping through segments, stream
//! switches) are coalesced by [`DeviceSyncBridge`] into a single update per
//! device, and payloads identical to the last one sent are skipped.

pub mod bridge;
pub mod config;
pub mod error;
pub mod payload;
pub mod sink;
pub mod store;

pub use bridge::DeviceSyncBridge;
pub use config::DevicesConfig;
pub use error::{DeviceError, Result};
pub use payload::{DeviceState, LightPayload, ScentPayload, SpeakerPayload};
pub use sink::{DeviceSink, HttpDeviceSink, LoggingDeviceSink};
pub use store::{DeviceStateStore, MemoryDeviceStore};
