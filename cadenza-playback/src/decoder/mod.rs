//! # Decoder Capabilities
//!
//! The pipeline uses two decoder families per container format:
//!
//! - **Streaming** decoders ([`Mp3StreamingDecoder`], [`FlacStreamingDecoder`])
//!   consume audio as it arrives and cannot seek. A background producer task
//!   decodes ahead into a sample buffer; the audio thread only drains that
//!   buffer and never blocks on I/O.
//! - **Seekable** decoders ([`Mp3SeekableDecoder`], [`FlacSeekableDecoder`])
//!   open the completed cache file and support random-access positioning.
//!
//! Both families are exposed through the [`PcmSource`] /
//! [`SeekablePcmSource`] traits so the owning stream dispatches through one
//! seam instead of per-format ladders.
//!
//! [`Mp3StreamingDecoder`]: mp3_stream::Mp3StreamingDecoder
//! [`FlacStreamingDecoder`]: flac_stream::FlacStreamingDecoder
//! [`Mp3SeekableDecoder`]: mp3_file::Mp3SeekableDecoder
//! [`FlacSeekableDecoder`]: flac_file::FlacSeekableDecoder

pub mod flac_file;
pub mod flac_stream;
pub mod mp3_file;
pub mod mp3_stream;
pub mod sample;

use crate::error::{PlaybackError, Result};
use symphonia::core::codecs::{Decoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::warn;

// ============================================================================
// Shared Types
// ============================================================================

/// Container format of a resolved track.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Container {
    Mp3,
    Flac,
}

impl Container {
    /// Lowercase name used in the stream info envelope.
    pub fn as_str(self) -> &'static str {
        match self {
            Container::Mp3 => "mp3",
            Container::Flac => "flac",
        }
    }

    /// File extension for cache files of this container.
    pub fn extension(self) -> &'static str {
        self.as_str()
    }
}

/// Decoded signal parameters of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SourceSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Outcome of a `read_frames` call.
///
/// Maps losslessly onto the C return-code contract: positive frame counts,
/// `0` for "try again", `-2` for end of stream, `-1` for error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// Frames were written into the caller's buffer.
    Frames(usize),
    /// No data available yet; the caller should retry.
    Pending,
    /// The stream has ended and the buffer is drained.
    EndOfStream,
    /// The source failed; details are in `last_error`.
    Failed,
}

impl ReadStatus {
    /// The integer code crossing the C boundary.
    pub fn as_code(self) -> i32 {
        match self {
            ReadStatus::Frames(n) => n as i32,
            ReadStatus::Pending => 0,
            ReadStatus::EndOfStream => -2,
            ReadStatus::Failed => -1,
        }
    }
}

// ============================================================================
// Capability Traits
// ============================================================================

/// A source of interleaved f32 PCM frames.
///
/// Implementations use interior mutability: `read_frames` is called from the
/// host's audio thread and must return without blocking on I/O.
pub trait PcmSource: Send + Sync {
    /// Decoded signal parameters (zero until known).
    fn spec(&self) -> SourceSpec;

    /// `true` once enough PCM is buffered for glitch-free playback start, or
    /// a terminal condition was reached. Latches monotonically.
    fn is_ready(&self) -> bool;

    /// `true` once the end of the stream was observed. Sticky for streaming
    /// sources.
    fn is_eof(&self) -> bool;

    /// Most recent failure recorded by the source's background task.
    fn last_error(&self) -> Option<String>;

    /// Write up to `frames` frames (`frames × channels` samples) into `out`.
    fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus;

    /// Cancel background work and release handles.
    fn close(&self);
}

/// A [`PcmSource`] over a complete file, supporting random access.
pub trait SeekablePcmSource: PcmSource {
    /// Total number of frames in the source.
    fn total_frames(&self) -> u64;

    /// Position the source at `frame`, returning the frame actually landed
    /// on. Clears any end-of-stream condition.
    fn seek(&self, frame: u64) -> Result<u64>;
}

// ============================================================================
// Symphonia Plumbing
// ============================================================================

/// A probed format reader paired with its codec decoder.
pub(crate) struct OpenedFormat {
    pub reader: Box<dyn FormatReader>,
    pub decoder: Box<dyn Decoder>,
    pub track_id: u32,
    pub spec: SourceSpec,
    pub n_frames: Option<u64>,
}

/// Probe `source` and set up a decoder for the first audio track.
pub(crate) fn open_format(
    source: MediaSourceStream,
    container: Container,
) -> Result<OpenedFormat> {
    let mut hint = Hint::new();
    hint.with_extension(container.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            source,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| PlaybackError::DecoderError(format!("format probe failed: {}", e)))?;

    let reader = probed.format;

    let track = reader
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| PlaybackError::DecoderError("no audio track".to_string()))?;

    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| PlaybackError::DecoderError("missing sample rate".to_string()))?;
    let channels = track
        .codec_params
        .channels
        .map(|ch| ch.count() as u16)
        .unwrap_or(2);
    let n_frames = track.codec_params.n_frames;

    let decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| PlaybackError::DecoderError(format!("decoder setup failed: {}", e)))?;

    Ok(OpenedFormat {
        reader,
        decoder,
        track_id,
        spec: SourceSpec {
            sample_rate,
            channels,
        },
        n_frames,
    })
}

/// Decode the next packet of the selected track into interleaved f32 samples.
///
/// Returns `Ok(None)` at end of stream. Corrupt packets are skipped, matching
/// decoder behavior elsewhere in the pipeline; only unrecoverable errors
/// propagate.
pub(crate) fn decode_next(fmt: &mut OpenedFormat) -> Result<Option<Vec<f32>>> {
    loop {
        let packet = match fmt.reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                return Ok(None);
            }
            Err(e) => {
                return Err(PlaybackError::DecoderError(format!(
                    "failed to read packet: {}",
                    e
                )));
            }
        };

        if packet.track_id() != fmt.track_id {
            continue;
        }

        match fmt.decoder.decode(&packet) {
            Ok(decoded) => return Ok(Some(sample::to_interleaved_f32(decoded))),
            Err(SymphoniaError::DecodeError(e)) => {
                warn!("skipping corrupt packet: {}", e);
                continue;
            }
            Err(e) => {
                return Err(PlaybackError::DecoderError(format!(
                    "failed to decode packet: {}",
                    e
                )));
            }
        }
    }
}
