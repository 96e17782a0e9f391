//! # Seekable FLAC Decoder
//!
//! Decodes FLAC from the completed cache file with sample-accurate seeks.
//! FLAC seeks land on frame boundaries, so `seek` reports the sample index
//! actually reached (at or slightly before the request) and the caller
//! records that as the current position. The internal sample buffer is
//! discarded on every seek; `eof` is cleared by any successful seek.

use crate::decoder::{
    decode_next, open_format, Container, OpenedFormat, PcmSource, ReadStatus, SeekablePcmSource,
    SourceSpec,
};
use crate::error::{PlaybackError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::Path;
use symphonia::core::formats::{SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use tracing::debug;

struct FileState {
    fmt: OpenedFormat,
    carry: VecDeque<f32>,
    position: u64,
    eof: bool,
    error: Option<String>,
}

/// Seekable FLAC decoder over a complete file.
pub struct FlacSeekableDecoder {
    inner: Mutex<FileState>,
    spec: SourceSpec,
    total_frames: u64,
}

impl FlacSeekableDecoder {
    /// Open the completed cache file. Ready immediately on success; the
    /// total sample count comes from STREAMINFO.
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let source = MediaSourceStream::new(Box::new(file), Default::default());
        let fmt = open_format(source, Container::Flac)?;

        let spec = fmt.spec;
        let total_frames = fmt.n_frames.unwrap_or(0);
        debug!(
            path = ?path,
            sample_rate = spec.sample_rate,
            total_frames,
            "opened seekable flac decoder"
        );

        Ok(Self {
            inner: Mutex::new(FileState {
                fmt,
                carry: VecDeque::new(),
                position: 0,
                eof: false,
                error: None,
            }),
            spec,
            total_frames,
        })
    }
}

impl PcmSource for FlacSeekableDecoder {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_eof(&self) -> bool {
        self.inner.lock().eof
    }

    fn last_error(&self) -> Option<String> {
        self.inner.lock().error.clone()
    }

    fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus {
        let mut inner = self.inner.lock();
        let channels = self.spec.channels.max(1) as usize;
        let want = frames * channels;

        while inner.carry.len() < want && !inner.eof {
            match decode_next(&mut inner.fmt) {
                Ok(Some(pcm)) => inner.carry.extend(pcm),
                Ok(None) => inner.eof = true,
                Err(e) => {
                    inner.error = Some(e.to_string());
                    inner.eof = true;
                    return ReadStatus::Failed;
                }
            }
        }

        let avail_frames = (inner.carry.len() / channels).min(frames);
        if avail_frames == 0 {
            return ReadStatus::EndOfStream;
        }

        let take = avail_frames * channels;
        for (slot, sample) in out.iter_mut().zip(inner.carry.drain(..take)) {
            *slot = sample;
        }
        inner.position += avail_frames as u64;
        ReadStatus::Frames(avail_frames)
    }

    // File handle is released when the decoder is dropped.
    fn close(&self) {}
}

impl SeekablePcmSource for FlacSeekableDecoder {
    fn total_frames(&self) -> u64 {
        self.total_frames
    }

    fn seek(&self, frame: u64) -> Result<u64> {
        let mut inner = self.inner.lock();
        let track_id = inner.fmt.track_id;

        let seeked = inner
            .fmt
            .reader
            .seek(
                SeekMode::Accurate,
                SeekTo::TimeStamp {
                    ts: frame,
                    track_id,
                },
            )
            .map_err(|e| PlaybackError::DecoderError(format!("seek failed: {}", e)))?;
        inner.fmt.decoder.reset();
        inner.carry.clear();
        inner.eof = false;
        inner.position = seeked.actual_ts;

        debug!(requested = frame, landed = seeked.actual_ts, "flac seek");
        Ok(seeked.actual_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_fails_for_missing_file() {
        let result = FlacSeekableDecoder::new(Path::new("/nonexistent/cadenza.flac"));
        assert!(matches!(result, Err(PlaybackError::Io(_))));
    }

    #[test]
    fn open_fails_for_garbage_bytes() {
        let path = std::env::temp_dir().join(format!("cadenza-flac-bad-file-{}.flac", std::process::id()));
        std::fs::write(&path, vec![0u8; 4096]).unwrap();

        let result = FlacSeekableDecoder::new(&path);
        assert!(matches!(result, Err(PlaybackError::DecoderError(_))));
        let _ = std::fs::remove_file(&path);
    }
}
