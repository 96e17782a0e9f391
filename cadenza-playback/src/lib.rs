//! # Cadenza Playback
//!
//! Streaming audio pipeline for the cadenza engine. A per-track
//! [`PcmStream`] coordinates an HTTP downloader writing through a disk
//! cache, two decoder families (MP3 and FLAC, each with a streaming and a
//! seekable variant), and the PCM delivery contract consumed by the host's
//! real-time audio callback.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   bytes    ┌──────────────────────┐
//! │  TrackCache  │──────────▶ │ cache file (growing) │
//! └──────┬───────┘            └──────────┬───────────┘
//!        │ complete (one-shot)           │ reads
//!        ▼                               ▼
//! ┌─────────────────────────────────────────────────┐
//! │                PcmStream (state machine)        │
//! │  streaming decoder ──▶ seekable decoder switch  │
//! └──────────────────────┬──────────────────────────┘
//!                        │ read_frames (audio thread)
//!                        ▼
//!                interleaved f32 PCM
//! ```
//!
//! The audio thread never blocks on I/O: "not ready yet" is expressed as a
//! zero-frame return, and a deferred seek produces silence until the cache
//! completes.

pub mod cache;
pub mod config;
pub mod decoder;
pub mod error;
pub mod registry;
pub mod stream;

pub use cache::TrackCache;
pub use config::StreamConfig;
pub use decoder::{Container, PcmSource, ReadStatus, SeekablePcmSource, SourceSpec};
pub use error::{PlaybackError, Result};
pub use registry::StreamRegistry;
pub use stream::{
    PcmStream, Phase, SeekOutcome, SeekableFactory, StreamInfo, StreamParams, StreamParts,
};
