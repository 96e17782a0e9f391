//! # Seekable MP3 Decoder
//!
//! Decodes MP3 from the completed cache file with random-access positioning.
//! The demuxer can only land on MP3 frame boundaries, so a seek decodes and
//! discards the tail up to the exact requested frame; the next read then
//! starts precisely at the target position.

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
    /// Samples decoded past what the last read consumed.
    carry: VecDeque<f32>,
    position: u64,
    eof: bool,
    error: Option<String>,
}

/// Seekable MP3 decoder over a complete file.
pub struct Mp3SeekableDecoder {
    inner: Mutex<FileState>,
    spec: SourceSpec,
    total_frames: u64,
}

impl Mp3SeekableDecoder {
    /// Open the completed cache file. Ready immediately on success.
    pub fn new(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)?;
        let source = MediaSourceStream::new(Box::new(file), Default::default());
        let fmt = open_format(source, Container::Mp3)?;

        let spec = fmt.spec;
        let total_frames = fmt.n_frames.unwrap_or(0);
        debug!(
            path = ?path,
            sample_rate = spec.sample_rate,
            total_frames,
            "opened seekable mp3 decoder"
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

impl PcmSource for Mp3SeekableDecoder {
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

impl SeekablePcmSource for Mp3SeekableDecoder {
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

        // The demuxer lands on the frame boundary at or before the request;
        // decode forward to the exact frame.
        let channels = self.spec.channels.max(1) as usize;
        let mut position = seeked.actual_ts;
        while position < frame {
            match decode_next(&mut inner.fmt) {
                Ok(Some(pcm)) => {
                    let block = (pcm.len() / channels) as u64;
                    if position + block > frame {
                        let skip = ((frame - position) as usize) * channels;
                        inner.carry.extend(pcm.into_iter().skip(skip));
                        position = frame;
                    } else {
                        position += block;
                    }
                }
                Ok(None) => {
                    inner.eof = true;
                    break;
                }
                Err(e) => {
                    inner.error = Some(e.to_string());
                    return Err(e);
                }
            }
        }

        inner.position = position;
        debug!(requested = frame, landed = position, "mp3 seek");
        Ok(position)
    }
}
