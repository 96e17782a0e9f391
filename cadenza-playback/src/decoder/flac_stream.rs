//! # Streaming FLAC Decoder
//!
//! FLAC cannot start decoding until the STREAMINFO metadata block is on
//! disk, so this decoder reads from the *growing* cache file instead of the
//! network. The stream calls [`FlacStreamingDecoder::try_open`] until the
//! header parses; success spawns a producer task that pre-decodes until half
//! a second of PCM is buffered, latches readiness, and then keeps the buffer
//! topped up.
//!
//! The producer distinguishes two end conditions on every parse error by
//! consulting the cache-completeness callback:
//!
//! 1. the downloader simply has not written enough bytes yet; the error is
//!    transient: drop the reader, wait briefly, reopen the file and replay
//!    (skip) packets up to the current sample position;
//! 2. the download is complete; the error is a true end of stream (or a
//!    fatal bitstream error) and `eof` latches.
//!
//! A parse error while the cache is incomplete is always treated as
//! transient.

use crate::config::StreamConfig;
use crate::decoder::{open_format, sample, Container, OpenedFormat, PcmSource, ReadStatus, SourceSpec};
use crate::error::{PlaybackError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::io::MediaSourceStream;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Minimum file size before attempting to parse the header.
const MIN_HEADER_BYTES: u64 = 1024;

/// Completeness probe provided by the owning stream's cache.
pub type CacheCompleteFn = Arc<dyn Fn() -> bool + Send + Sync>;

#[derive(Default)]
struct FlacState {
    samples: VecDeque<f32>,
    sample_rate: u32,
    channels: u16,
    /// Decode position in frames; the replay target after a reopen.
    current_frame: u64,
    ready: bool,
    eof: bool,
    error: Option<String>,
    opened: bool,
}

struct FlacShared {
    state: Mutex<FlacState>,
}

/// Streaming FLAC decoder polling the growing cache file.
pub struct FlacStreamingDecoder {
    shared: Arc<FlacShared>,
    cache_path: PathBuf,
    is_cache_complete: CacheCompleteFn,
    config: StreamConfig,
    cancel: CancellationToken,
}

impl FlacStreamingDecoder {
    pub fn new(
        cache_path: PathBuf,
        is_cache_complete: CacheCompleteFn,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(FlacShared {
                state: Mutex::new(FlacState::default()),
            }),
            cache_path,
            is_cache_complete,
            config,
            cancel,
        }
    }

    /// Attempt to parse the FLAC header from the current cache file.
    ///
    /// Returns `false` while the file is too small or the header has not
    /// fully arrived. The first success records the signal parameters and
    /// spawns the prefill/producer task; later calls are no-ops returning
    /// `true`.
    pub fn try_open(&self, handle: &Handle) -> bool {
        if self.shared.state.lock().opened {
            return true;
        }

        let len = match std::fs::metadata(&self.cache_path) {
            Ok(meta) => meta.len(),
            Err(_) => return false,
        };
        if len < MIN_HEADER_BYTES {
            return false;
        }

        let fmt = match open_file(&self.cache_path) {
            Ok(fmt) => fmt,
            // Header not fully downloaded yet.
            Err(_) => return false,
        };

        {
            let mut state = self.shared.state.lock();
            if state.opened {
                return true;
            }
            state.opened = true;
            state.sample_rate = fmt.spec.sample_rate;
            state.channels = fmt.spec.channels;
        }
        debug!(
            sample_rate = fmt.spec.sample_rate,
            channels = fmt.spec.channels,
            "flac stream opened"
        );

        let shared = Arc::clone(&self.shared);
        let path = self.cache_path.clone();
        let is_complete = Arc::clone(&self.is_cache_complete);
        let cancel = self.cancel.clone();
        let config = self.config;
        handle.spawn_blocking(move || run_producer(fmt, shared, path, is_complete, cancel, config));

        true
    }
}

impl PcmSource for FlacStreamingDecoder {
    fn spec(&self) -> SourceSpec {
        let state = self.shared.state.lock();
        SourceSpec {
            sample_rate: state.sample_rate,
            channels: state.channels,
        }
    }

    fn is_ready(&self) -> bool {
        self.shared.state.lock().ready
    }

    fn is_eof(&self) -> bool {
        self.shared.state.lock().eof
    }

    fn last_error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus {
        let mut state = self.shared.state.lock();
        if !state.ready {
            return ReadStatus::Pending;
        }

        let channels = state.channels.max(1) as usize;
        let want = frames * channels;
        if state.samples.len() < want && !state.eof {
            // The producer is refilling (or replaying after a stall).
            return ReadStatus::Pending;
        }

        let avail_frames = (state.samples.len() / channels).min(frames);
        if avail_frames == 0 {
            if state.error.is_some() {
                return ReadStatus::Failed;
            }
            if state.eof {
                return ReadStatus::EndOfStream;
            }
            return ReadStatus::Pending;
        }

        let take = avail_frames * channels;
        for (slot, sample) in out.iter_mut().zip(state.samples.drain(..take)) {
            *slot = sample;
        }
        ReadStatus::Frames(avail_frames)
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

fn open_file(path: &Path) -> Result<OpenedFormat> {
    let file = std::fs::File::open(path)?;
    let source = MediaSourceStream::new(Box::new(file), Default::default());
    open_format(source, Container::Flac)
}

/// Decode the next FLAC frame into interleaved f32 samples.
///
/// Unlike complete-file decoding, a frame that fails to decode is NOT
/// skipped: on a growing file it is usually half-written, and the caller
/// must classify the error as transient or fatal before any bytes are
/// abandoned.
fn next_block(fmt: &mut OpenedFormat) -> Result<Option<Vec<f32>>> {
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
                    "failed to read frame: {}",
                    e
                )));
            }
        };
        if packet.track_id() != fmt.track_id {
            continue;
        }
        return match fmt.decoder.decode(&packet) {
            Ok(decoded) => Ok(Some(sample::to_interleaved_f32(decoded))),
            Err(e) => Err(PlaybackError::DecoderError(format!(
                "failed to decode frame: {}",
                e
            ))),
        };
    }
}

fn run_producer(
    fmt: OpenedFormat,
    shared: Arc<FlacShared>,
    path: PathBuf,
    is_cache_complete: CacheCompleteFn,
    cancel: CancellationToken,
    config: StreamConfig,
) {
    let ready_target = config.ready_samples(fmt.spec.sample_rate, fmt.spec.channels);
    let channels = fmt.spec.channels.max(1) as u64;
    let mut reader: Option<OpenedFormat> = Some(fmt);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        {
            let state = shared.state.lock();
            if state.eof {
                return;
            }
            if state.samples.len() >= config.max_buffered_samples {
                drop(state);
                std::thread::sleep(config.producer_idle);
                continue;
            }
        }

        let fmt = match reader.as_mut() {
            Some(fmt) => fmt,
            None => {
                // Awaiting more bytes from the downloader.
                std::thread::sleep(config.reopen_delay);
                if cancel.is_cancelled() {
                    return;
                }
                let target = shared.state.lock().current_frame;
                reader = reopen_at(&path, target);
                continue;
            }
        };

        match next_block(fmt) {
            Ok(Some(pcm)) => {
                let frames = pcm.len() as u64 / channels;
                let mut state = shared.state.lock();
                state.current_frame += frames;
                state.samples.extend(pcm);
                if !state.ready && state.samples.len() >= ready_target {
                    state.ready = true;
                    debug!(buffered = state.samples.len(), "flac stream ready");
                }
            }
            outcome => {
                if is_cache_complete() {
                    let mut state = shared.state.lock();
                    if let Err(e) = outcome {
                        warn!("flac stream failed at end of cache: {}", e);
                        state.error = Some(e.to_string());
                    }
                    state.eof = true;
                    state.ready = true;
                    debug!(frames = state.current_frame, "flac stream ended");
                    return;
                }
                // The file is still downloading; the parse error is
                // transient. Drop the reader (closing the handle) and
                // reopen once more bytes have landed.
                reader = None;
            }
        }
    }
}

/// Reopen the cache file and replay packets up to `target_frame`.
///
/// Returns `None` when the file cannot yet be replayed that far; the caller
/// retries after a delay. Packets are skipped without decoding, since FLAC
/// frames are independent, so the fresh decoder needs no warm-up.
fn reopen_at(path: &Path, target_frame: u64) -> Option<OpenedFormat> {
    let mut fmt = open_file(path).ok()?;

    let mut skipped: u64 = 0;
    while skipped < target_frame {
        match fmt.reader.next_packet() {
            Ok(packet) => {
                if packet.track_id() != fmt.track_id {
                    continue;
                }
                skipped += packet.dur();
            }
            Err(_) => return None,
        }
    }
    Some(fmt)
}
