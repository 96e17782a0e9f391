//! # PCM Stream
//!
//! Per-track state machine coordinating the cache and one decoder of each
//! family. The stream starts on a streaming decoder for instantaneous
//! playback, and transparently switches to a seekable decoder once the
//! cache file is complete.
//!
//! ## States
//!
//! | Phase          | Serving                 | Notes                              |
//! |----------------|-------------------------|------------------------------------|
//! | `Initializing` | streaming (not ready)   | header / prefill pending           |
//! | `Streaming`    | streaming               |                                    |
//! | `AwaitingSeek` | silence                 | seek deferred until cache complete |
//! | `Seekable`     | seekable                | random access available            |
//! | `Closed`       | nothing                 | all resources released             |
//!
//! A seek issued before the seekable decoder exists returns "deferred" and
//! pauses output to silence: the host's audio callback cannot tolerate
//! blocking or underruns, so zero-filled buffers stand in until the cache
//! completes and the stored seek is applied. The cache-complete callback and
//! an explicit seek may race to construct the seekable decoder; construction
//! happens outside the stream lock and installation is idempotent under it.

use crate::cache::TrackCache;
use crate::config::StreamConfig;
use crate::decoder::flac_file::FlacSeekableDecoder;
use crate::decoder::flac_stream::FlacStreamingDecoder;
use crate::decoder::mp3_file::Mp3SeekableDecoder;
use crate::decoder::mp3_stream::Mp3StreamingDecoder;
use crate::decoder::{Container, PcmSource, ReadStatus, SeekablePcmSource, SourceSpec};
use crate::error::{PlaybackError, Result};
use parking_lot::Mutex;
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// ============================================================================
// Public Types
// ============================================================================

/// Immutable identity of a stream, resolved by the service client.
#[derive(Debug, Clone)]
pub struct StreamParams {
    pub track_id: i64,
    pub url: String,
    pub container: Container,
    /// Quality label, part of the cache fingerprint.
    pub quality: String,
    /// Expected download size, when the service reports one.
    pub size: Option<u64>,
}

/// Control state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Streaming decoder present but not yet ready.
    Initializing,
    /// Serving frames from the streaming decoder.
    Streaming,
    /// Deferred seek stored; output is silence until the transition.
    AwaitingSeek(u64),
    /// Serving frames from the seekable decoder.
    Seekable,
    /// All owned resources released.
    Closed,
}

/// Result of a seek request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The seekable decoder repositioned immediately.
    Applied,
    /// The seek was stored; output pauses until the cache completes.
    Deferred,
}

/// Aggregated stream information for the host.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamInfo {
    pub stream_id: i64,
    pub sample_rate: u32,
    pub channels: u16,
    pub total_frames: u64,
    pub is_ready: bool,
    pub can_seek: bool,
    #[serde(rename = "isEOF")]
    pub is_eof: bool,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Constructor for the seekable decoder, deferred until the cache file is
/// complete. Injected so the transition logic is independent of the decoder
/// family (and drivable from tests).
pub type SeekableFactory = Box<dyn Fn() -> Result<Arc<dyn SeekablePcmSource>> + Send + Sync>;

/// Owned collaborators of a stream.
pub struct StreamParts {
    pub cache: Arc<TrackCache>,
    pub streaming: Arc<dyn PcmSource>,
    /// Typed handle kept for the FLAC header poller.
    pub flac_streaming: Option<Arc<FlacStreamingDecoder>>,
    pub seekable_factory: SeekableFactory,
    pub cancel: CancellationToken,
}

// ============================================================================
// Stream
// ============================================================================

struct StreamState {
    phase: Phase,
    streaming: Option<Arc<dyn PcmSource>>,
    seekable: Option<Arc<dyn SeekablePcmSource>>,
    /// Authoritative signal parameters, copied from the seekable decoder at
    /// the transition; zero until then.
    sample_rate: u32,
    channels: u16,
    total_frames: u64,
    last_error: Option<String>,
}

/// One playing track: cache + decoders + transition state.
pub struct PcmStream {
    id: i64,
    track_id: i64,
    url: String,
    container: Container,
    cache: Arc<TrackCache>,
    flac_streaming: Option<Arc<FlacStreamingDecoder>>,
    seekable_factory: SeekableFactory,
    runtime: Handle,
    config: StreamConfig,
    cancel: CancellationToken,
    inner: Mutex<StreamState>,
}

impl PcmStream {
    /// Assemble a stream from its parts. `create` wires the production
    /// parts; tests may inject stub sources.
    pub fn new(
        id: i64,
        params: StreamParams,
        parts: StreamParts,
        runtime: Handle,
        config: StreamConfig,
    ) -> Self {
        Self {
            id,
            track_id: params.track_id,
            url: params.url,
            container: params.container,
            cache: parts.cache,
            flac_streaming: parts.flac_streaming,
            seekable_factory: parts.seekable_factory,
            runtime,
            config,
            cancel: parts.cancel,
            inner: Mutex::new(StreamState {
                phase: Phase::Initializing,
                streaming: Some(parts.streaming),
                seekable: None,
                sample_rate: 0,
                channels: 0,
                total_frames: 0,
                last_error: None,
            }),
        }
    }

    /// Build a stream with production collaborators: the cache downloader
    /// and the streaming decoder matching the container. Decoder tasks for
    /// MP3 start here; FLAC decoding starts once the header poller spawned
    /// by [`PcmStream::start`] manages to open the growing file.
    pub fn create(
        id: i64,
        params: StreamParams,
        client: reqwest::Client,
        cache_dir: &Path,
        runtime: Handle,
        config: StreamConfig,
    ) -> Result<Self> {
        if params.url.is_empty() {
            return Err(PlaybackError::InvalidArgument("empty track URL".to_string()));
        }
        config
            .validate()
            .map_err(PlaybackError::InvalidArgument)?;

        let cancel = CancellationToken::new();
        let cache = Arc::new(TrackCache::new(
            client.clone(),
            &params.url,
            params.track_id,
            &params.quality,
            params.container,
            cache_dir,
            params.size,
            cancel.child_token(),
        )?);

        let mut flac_streaming = None;
        let streaming: Arc<dyn PcmSource> = match params.container {
            Container::Mp3 => {
                let decoder = Arc::new(Mp3StreamingDecoder::new(
                    client,
                    params.url.clone(),
                    config,
                    cancel.child_token(),
                ));
                decoder.start(&runtime);
                decoder
            }
            Container::Flac => {
                let probe_cache = Arc::clone(&cache);
                let decoder = Arc::new(FlacStreamingDecoder::new(
                    cache.path().to_path_buf(),
                    Arc::new(move || probe_cache.is_complete()),
                    config,
                    cancel.child_token(),
                ));
                flac_streaming = Some(Arc::clone(&decoder));
                decoder
            }
        };

        let seekable_factory: SeekableFactory = {
            let container = params.container;
            let path = cache.path().to_path_buf();
            Box::new(move || build_seekable(container, &path))
        };

        let parts = StreamParts {
            cache,
            streaming,
            flac_streaming,
            seekable_factory,
            cancel,
        };
        Ok(Self::new(id, params, parts, runtime, config))
    }

    /// Start background work: the cache download, the completion callback,
    /// and (for FLAC) the header poller.
    pub fn start(self: &Arc<Self>) {
        let weak = Arc::downgrade(self);
        self.cache.set_on_complete(move || {
            if let Some(stream) = weak.upgrade() {
                let runtime = stream.runtime.clone();
                runtime.spawn_blocking(move || stream.handle_cache_complete());
            }
        });
        self.cache.start_download(&self.runtime);

        if let Some(flac) = &self.flac_streaming {
            let flac = Arc::clone(flac);
            let cache = Arc::clone(&self.cache);
            let runtime = self.runtime.clone();
            let cancel = self.cancel.child_token();
            let config = self.config;
            self.runtime.spawn(async move {
                for _ in 0..config.open_poll_attempts {
                    if cancel.is_cancelled() {
                        return;
                    }
                    if flac.try_open(&runtime) {
                        return;
                    }
                    if cache.is_complete() {
                        // The completion callback switches to the seekable
                        // decoder; no point parsing the stream header now.
                        return;
                    }
                    tokio::time::sleep(config.open_poll_interval).await;
                }
                warn!("giving up waiting for the flac header");
            });
        }
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn track_id(&self) -> i64 {
        self.track_id
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn container(&self) -> Container {
        self.container
    }

    /// Current control phase.
    pub fn phase(&self) -> Phase {
        let mut state = self.inner.lock();
        refresh_phase(&mut state);
        state.phase
    }

    /// Channel count of the active source; zero while unknown.
    pub fn channel_count(&self) -> u16 {
        let state = self.inner.lock();
        channels_of(&state)
    }

    // ------------------------------------------------------------------
    // Frame delivery
    // ------------------------------------------------------------------

    /// Read up to `frames` frames into `out`. Never blocks on I/O: returns
    /// [`ReadStatus::Pending`] while data is not available, and silence
    /// while a deferred seek is pending.
    pub fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus {
        let mut state = self.inner.lock();
        refresh_phase(&mut state);

        match state.phase {
            Phase::Closed => ReadStatus::Failed,
            Phase::AwaitingSeek(_) => {
                let channels = channels_of(&state).max(1) as usize;
                let samples = (frames * channels).min(out.len());
                for slot in out.iter_mut().take(samples) {
                    *slot = 0.0;
                }
                ReadStatus::Frames(frames)
            }
            Phase::Seekable => match &state.seekable {
                Some(source) => source.read_frames(out, frames),
                None => ReadStatus::Failed,
            },
            Phase::Initializing | Phase::Streaming => match &state.streaming {
                Some(source) => source.read_frames(out, frames),
                None => ReadStatus::Failed,
            },
        }
    }

    // ------------------------------------------------------------------
    // Seeking
    // ------------------------------------------------------------------

    /// Seek to `frame`. Returns [`SeekOutcome::Deferred`] when the seekable
    /// decoder cannot exist yet (cache incomplete): the target is stored,
    /// output pauses, and the transition applies it on cache completion.
    pub fn seek(&self, frame: u64) -> Result<SeekOutcome> {
        enum Action {
            Defer,
            Apply,
            Build,
        }

        let action = {
            let mut state = self.inner.lock();
            refresh_phase(&mut state);
            if state.phase == Phase::Closed {
                return Err(PlaybackError::NotFound(self.id));
            }
            if state.seekable.is_some() {
                Action::Apply
            } else if self.cache.is_complete() {
                Action::Build
            } else {
                state.phase = Phase::AwaitingSeek(frame);
                Action::Defer
            }
        };

        match action {
            Action::Defer => {
                debug!(stream = self.id, frame, "seek deferred until cache completes");
                Ok(SeekOutcome::Deferred)
            }
            Action::Apply => {
                let mut state = self.inner.lock();
                self.switch_and_seek(&mut state, frame)
            }
            Action::Build => {
                // Construct outside the lock; the cache-complete callback
                // may be doing the same. First install wins.
                let built = (self.seekable_factory)();
                let mut state = self.inner.lock();
                if state.phase == Phase::Closed {
                    return Err(PlaybackError::NotFound(self.id));
                }
                if state.seekable.is_none() {
                    match built {
                        Ok(source) => install_seekable(&mut state, source),
                        Err(e) => {
                            state.last_error = Some(e.to_string());
                            return Err(e);
                        }
                    }
                }
                self.switch_and_seek(&mut state, frame)
            }
        }
    }

    fn switch_and_seek(&self, state: &mut StreamState, frame: u64) -> Result<SeekOutcome> {
        let seekable = state
            .seekable
            .clone()
            .ok_or_else(|| PlaybackError::DecoderError("seekable decoder missing".to_string()))?;

        if state.phase != Phase::Seekable {
            if let Some(streaming) = state.streaming.take() {
                streaming.close();
            }
            state.phase = Phase::Seekable;
            debug!(stream = self.id, "switched to seekable decoder");
        }

        match seekable.seek(frame) {
            Ok(landed) => {
                debug!(stream = self.id, frame, landed, "seek applied");
                Ok(SeekOutcome::Applied)
            }
            Err(e) => {
                state.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Transition driven by the cache completion callback. Constructs the
    /// seekable decoder and applies a pending seek, if any. Without a
    /// pending seek the streaming decoder keeps serving frames so playback
    /// does not glitch mid-buffer; the switch happens on the next explicit
    /// seek.
    pub fn handle_cache_complete(&self) {
        let needs_build = {
            let state = self.inner.lock();
            state.phase != Phase::Closed && state.seekable.is_none()
        };
        let built = if needs_build {
            Some((self.seekable_factory)())
        } else {
            None
        };

        let mut state = self.inner.lock();
        if state.phase == Phase::Closed {
            return;
        }
        if state.seekable.is_none() {
            match built {
                Some(Ok(source)) => install_seekable(&mut state, source),
                Some(Err(e)) => {
                    warn!(stream = self.id, "failed to open seekable decoder: {}", e);
                    state.last_error = Some(e.to_string());
                    return;
                }
                None => return,
            }
        }

        if let Phase::AwaitingSeek(frame) = state.phase {
            if let Some(streaming) = state.streaming.take() {
                streaming.close();
            }
            state.phase = Phase::Seekable;
            if let Some(seekable) = state.seekable.clone() {
                match seekable.seek(frame) {
                    Ok(landed) => {
                        debug!(stream = self.id, frame, landed, "applied deferred seek")
                    }
                    Err(e) => {
                        warn!(stream = self.id, "deferred seek failed: {}", e);
                        state.last_error = Some(e.to_string());
                    }
                }
            }
        }
    }

    /// `true` once the seekable decoder exists.
    pub fn can_seek(&self) -> bool {
        let state = self.inner.lock();
        state.phase != Phase::Closed && state.seekable.is_some()
    }

    pub fn has_pending_seek(&self) -> bool {
        matches!(self.inner.lock().phase, Phase::AwaitingSeek(_))
    }

    /// Stored deferred-seek target, if any.
    pub fn pending_seek_frame(&self) -> Option<u64> {
        match self.inner.lock().phase {
            Phase::AwaitingSeek(frame) => Some(frame),
            _ => None,
        }
    }

    /// Drop a deferred seek: normal streaming resumes where the streaming
    /// decoder last was.
    pub fn cancel_pending_seek(&self) {
        let mut state = self.inner.lock();
        if matches!(state.phase, Phase::AwaitingSeek(_)) {
            state.phase = Phase::Streaming;
            debug!(stream = self.id, "pending seek cancelled");
        }
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    pub fn is_ready(&self) -> bool {
        let mut state = self.inner.lock();
        refresh_phase(&mut state);
        match state.phase {
            Phase::Closed => false,
            Phase::Seekable => state
                .seekable
                .as_ref()
                .map(|s| s.is_ready())
                .unwrap_or(false),
            _ => state
                .streaming
                .as_ref()
                .map(|s| s.is_ready())
                .unwrap_or(false),
        }
    }

    pub fn cache_progress(&self) -> f64 {
        self.cache.progress()
    }

    /// Most relevant error: the stream's own, else the active source's.
    pub fn last_error(&self) -> Option<String> {
        let state = self.inner.lock();
        if state.last_error.is_some() {
            return state.last_error.clone();
        }
        let source_error = match state.phase {
            Phase::Seekable => state.seekable.as_ref().and_then(|s| s.last_error()),
            _ => state.streaming.as_ref().and_then(|s| s.last_error()),
        };
        source_error.or_else(|| self.cache.last_error())
    }

    /// Aggregated info for the host's JSON envelope.
    pub fn info(&self) -> StreamInfo {
        let mut state = self.inner.lock();
        refresh_phase(&mut state);

        let (spec, ready, eof, source_error) = match state.phase {
            Phase::Closed => (SourceSpec::default(), false, true, None),
            Phase::Seekable => state
                .seekable
                .as_ref()
                .map(|s| (s.spec(), s.is_ready(), s.is_eof(), s.last_error()))
                .unwrap_or_default(),
            _ => state
                .streaming
                .as_ref()
                .map(|s| (s.spec(), s.is_ready(), s.is_eof(), s.last_error()))
                .unwrap_or_default(),
        };

        StreamInfo {
            stream_id: self.id,
            sample_rate: if state.sample_rate != 0 {
                state.sample_rate
            } else {
                spec.sample_rate
            },
            channels: if state.channels != 0 {
                state.channels
            } else {
                spec.channels
            },
            total_frames: state.total_frames,
            is_ready: ready,
            can_seek: state.seekable.is_some(),
            is_eof: eof,
            format: self.container.as_str().to_string(),
            error: state.last_error.clone().or(source_error),
        }
    }

    // ------------------------------------------------------------------
    // Teardown
    // ------------------------------------------------------------------

    /// Close all owned resources, in reverse acquisition order: seekable
    /// decoder, streaming decoder, cache. Idempotent.
    pub fn close(&self) {
        let (seekable, streaming) = {
            let mut state = self.inner.lock();
            if state.phase == Phase::Closed {
                return;
            }
            state.phase = Phase::Closed;
            (state.seekable.take(), state.streaming.take())
        };

        if let Some(source) = seekable {
            source.close();
        }
        if let Some(source) = streaming {
            source.close();
        }
        self.cache.close();
        self.cancel.cancel();
        info!(stream = self.id, "stream closed");
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Initializing upgrades to Streaming once the streaming decoder latches
/// ready. The upgrade is observed lazily; readiness itself is monotone.
fn refresh_phase(state: &mut StreamState) {
    if state.phase == Phase::Initializing {
        let ready = state
            .streaming
            .as_ref()
            .map(|s| s.is_ready())
            .unwrap_or(false);
        if ready {
            state.phase = Phase::Streaming;
        }
    }
}

fn channels_of(state: &StreamState) -> u16 {
    if state.channels != 0 {
        return state.channels;
    }
    if let Some(source) = &state.streaming {
        return source.spec().channels;
    }
    if let Some(source) = &state.seekable {
        return source.spec().channels;
    }
    0
}

fn install_seekable(state: &mut StreamState, source: Arc<dyn SeekablePcmSource>) {
    let spec = source.spec();
    state.sample_rate = spec.sample_rate;
    state.channels = spec.channels;
    state.total_frames = source.total_frames();
    state.seekable = Some(source);
}

fn build_seekable(container: Container, path: &Path) -> Result<Arc<dyn SeekablePcmSource>> {
    match container {
        Container::Mp3 => Ok(Arc::new(Mp3SeekableDecoder::new(path)?)),
        Container::Flac => Ok(Arc::new(FlacSeekableDecoder::new(path)?)),
    }
}
