//! State-machine tests for `PcmStream`, driven through stub decoder
//! implementations so no audio data or network is involved.

use cadenza_playback::{
    Container, PcmSource, PcmStream, Phase, ReadStatus, SeekOutcome, SeekableFactory,
    SeekablePcmSource, SourceSpec, StreamConfig, StreamParams, StreamParts, TrackCache,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Stub Sources
// ============================================================================

struct StubStreaming {
    spec: SourceSpec,
    ready: AtomicBool,
    eof: AtomicBool,
    closed: AtomicBool,
    fill: f32,
    forced: Mutex<Option<ReadStatus>>,
}

impl StubStreaming {
    fn new(fill: f32) -> Arc<Self> {
        Arc::new(Self {
            spec: SourceSpec {
                sample_rate: 44_100,
                channels: 2,
            },
            ready: AtomicBool::new(true),
            eof: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            fill,
            forced: Mutex::new(None),
        })
    }

    fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    fn force(&self, status: ReadStatus) {
        *self.forced.lock() = Some(status);
    }

    fn was_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl PcmSource for StubStreaming {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn is_eof(&self) -> bool {
        self.eof.load(Ordering::SeqCst)
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus {
        if let Some(forced) = *self.forced.lock() {
            return forced;
        }
        if !self.is_ready() {
            return ReadStatus::Pending;
        }
        let samples = frames * self.spec.channels as usize;
        for slot in out.iter_mut().take(samples) {
            *slot = self.fill;
        }
        ReadStatus::Frames(frames)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

struct StubSeekable {
    spec: SourceSpec,
    total: u64,
    fill: f32,
    seeks: Mutex<Vec<u64>>,
}

impl StubSeekable {
    fn new(fill: f32, total: u64) -> Arc<Self> {
        Arc::new(Self {
            spec: SourceSpec {
                sample_rate: 44_100,
                channels: 2,
            },
            total,
            fill,
            seeks: Mutex::new(Vec::new()),
        })
    }

    fn recorded_seeks(&self) -> Vec<u64> {
        self.seeks.lock().clone()
    }
}

impl PcmSource for StubSeekable {
    fn spec(&self) -> SourceSpec {
        self.spec
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn is_eof(&self) -> bool {
        false
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn read_frames(&self, out: &mut [f32], frames: usize) -> ReadStatus {
        let samples = frames * self.spec.channels as usize;
        for slot in out.iter_mut().take(samples) {
            *slot = self.fill;
        }
        ReadStatus::Frames(frames)
    }

    fn close(&self) {}
}

impl SeekablePcmSource for StubSeekable {
    fn total_frames(&self) -> u64 {
        self.total
    }

    fn seek(&self, frame: u64) -> cadenza_playback::Result<u64> {
        self.seeks.lock().push(frame);
        Ok(frame)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

const STREAM_FILL: f32 = 0.25;
const SEEKABLE_FILL: f32 = 0.5;

fn cache_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cadenza-stream-tests-{}-{}",
        tag,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn incomplete_cache(tag: &str) -> Arc<TrackCache> {
    Arc::new(
        TrackCache::new(
            reqwest::Client::new(),
            "http://localhost/never",
            7,
            "exhigh",
            Container::Mp3,
            &cache_dir(tag),
            None,
            CancellationToken::new(),
        )
        .unwrap(),
    )
}

/// A cache whose file already exists with the expected size, so the entry
/// starts out complete (the cross-session reuse path).
fn complete_cache(tag: &str) -> Arc<TrackCache> {
    let dir = cache_dir(tag);
    let probe = TrackCache::new(
        reqwest::Client::new(),
        "http://localhost/never",
        7,
        "exhigh",
        Container::Mp3,
        &dir,
        None,
        CancellationToken::new(),
    )
    .unwrap();
    let path = probe.path().to_path_buf();
    drop(probe);
    std::fs::write(&path, vec![0u8; 256]).unwrap();

    Arc::new(
        TrackCache::new(
            reqwest::Client::new(),
            "http://localhost/never",
            7,
            "exhigh",
            Container::Mp3,
            &dir,
            Some(256),
            CancellationToken::new(),
        )
        .unwrap(),
    )
}

struct Fixture {
    stream: Arc<PcmStream>,
    streaming: Arc<StubStreaming>,
    seekable: Arc<StubSeekable>,
    factory_calls: Arc<AtomicUsize>,
}

fn fixture(cache: Arc<TrackCache>) -> Fixture {
    let streaming = StubStreaming::new(STREAM_FILL);
    let seekable = StubSeekable::new(SEEKABLE_FILL, 441_000);
    let factory_calls = Arc::new(AtomicUsize::new(0));

    let factory: SeekableFactory = {
        let seekable = Arc::clone(&seekable);
        let calls = Arc::clone(&factory_calls);
        Box::new(move || {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::clone(&seekable) as Arc<dyn SeekablePcmSource>)
        })
    };

    let params = StreamParams {
        track_id: 7,
        url: "http://localhost/never".to_string(),
        container: Container::Mp3,
        quality: "exhigh".to_string(),
        size: None,
    };
    let parts = StreamParts {
        cache,
        streaming: Arc::clone(&streaming) as Arc<dyn PcmSource>,
        flac_streaming: None,
        seekable_factory: factory,
        cancel: CancellationToken::new(),
    };
    let stream = Arc::new(PcmStream::new(
        1,
        params,
        parts,
        Handle::current(),
        StreamConfig::default(),
    ));

    Fixture {
        stream,
        streaming,
        seekable,
        factory_calls,
    }
}

fn read(stream: &PcmStream, frames: usize) -> (ReadStatus, Vec<f32>) {
    let mut out = vec![f32::NAN; frames * 2];
    let status = stream.read_frames(&mut out, frames);
    (status, out)
}

// ============================================================================
// Scenarios
// ============================================================================

#[tokio::test]
async fn readiness_upgrades_initializing_to_streaming() {
    let fx = fixture(incomplete_cache("phase"));
    fx.streaming.set_ready(false);

    assert_eq!(fx.stream.phase(), Phase::Initializing);
    assert!(!fx.stream.is_ready());
    assert_eq!(read(&fx.stream, 16).0, ReadStatus::Pending);

    fx.streaming.set_ready(true);
    assert!(fx.stream.is_ready());
    assert_eq!(fx.stream.phase(), Phase::Streaming);
}

#[tokio::test]
async fn streaming_reads_pass_through_codes() {
    let fx = fixture(incomplete_cache("codes"));

    let (status, out) = read(&fx.stream, 16);
    assert_eq!(status, ReadStatus::Frames(16));
    assert!(out.iter().all(|&s| s == STREAM_FILL));

    fx.streaming.force(ReadStatus::Pending);
    assert_eq!(read(&fx.stream, 16).0, ReadStatus::Pending);
    fx.streaming.force(ReadStatus::EndOfStream);
    assert_eq!(read(&fx.stream, 16).0, ReadStatus::EndOfStream);
    fx.streaming.force(ReadStatus::Failed);
    assert_eq!(read(&fx.stream, 16).0, ReadStatus::Failed);
}

#[tokio::test]
async fn seek_before_cache_complete_defers_and_pauses() {
    let fx = fixture(incomplete_cache("defer"));

    assert_eq!(fx.stream.seek(44_100 * 60).unwrap(), SeekOutcome::Deferred);
    assert!(fx.stream.has_pending_seek());
    assert_eq!(fx.stream.pending_seek_frame(), Some(44_100 * 60));
    assert!(!fx.stream.can_seek());

    // Output is silence while paused, full frame counts.
    let (status, out) = read(&fx.stream, 32);
    assert_eq!(status, ReadStatus::Frames(32));
    assert!(out.iter().all(|&s| s == 0.0));
}

#[tokio::test]
async fn cancel_pending_seek_resumes_live_output() {
    let fx = fixture(incomplete_cache("cancel"));

    fx.stream.seek(1000).unwrap();
    assert!(fx.stream.has_pending_seek());

    fx.stream.cancel_pending_seek();
    assert!(!fx.stream.has_pending_seek());
    assert_eq!(fx.stream.pending_seek_frame(), None);

    // Streaming output resumes from the streaming decoder.
    let (status, out) = read(&fx.stream, 8);
    assert_eq!(status, ReadStatus::Frames(8));
    assert!(out.iter().all(|&s| s == STREAM_FILL));
    assert!(!fx.streaming.was_closed());
}

#[tokio::test]
async fn cache_completion_applies_pending_seek() {
    let fx = fixture(incomplete_cache("apply"));

    fx.stream.seek(12_345).unwrap();
    fx.stream.handle_cache_complete();

    assert!(!fx.stream.has_pending_seek());
    assert_eq!(fx.stream.phase(), Phase::Seekable);
    assert!(fx.stream.can_seek());
    assert!(fx.streaming.was_closed());
    assert_eq!(fx.seekable.recorded_seeks(), vec![12_345]);

    // Frames now come from the seekable decoder.
    let (status, out) = read(&fx.stream, 8);
    assert_eq!(status, ReadStatus::Frames(8));
    assert!(out.iter().all(|&s| s == SEEKABLE_FILL));
}

#[tokio::test]
async fn completion_without_pending_keeps_streaming_output() {
    let fx = fixture(incomplete_cache("lazy"));

    fx.stream.handle_cache_complete();

    // Seekable decoder exists, but the streaming decoder keeps serving
    // frames until the next explicit seek.
    assert!(fx.stream.can_seek());
    assert_eq!(fx.stream.phase(), Phase::Streaming);
    assert!(!fx.streaming.was_closed());
    let (_, out) = read(&fx.stream, 8);
    assert!(out.iter().all(|&s| s == STREAM_FILL));

    // Explicit seek performs the switch, exactly once.
    assert_eq!(fx.stream.seek(500).unwrap(), SeekOutcome::Applied);
    assert_eq!(fx.stream.phase(), Phase::Seekable);
    assert!(fx.streaming.was_closed());
    let (_, out) = read(&fx.stream, 8);
    assert!(out.iter().all(|&s| s == SEEKABLE_FILL));
}

#[tokio::test]
async fn transition_constructs_seekable_exactly_once() {
    let fx = fixture(incomplete_cache("idempotent"));

    fx.stream.handle_cache_complete();
    fx.stream.handle_cache_complete();
    fx.stream.seek(10).unwrap();
    fx.stream.seek(20).unwrap();

    assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.seekable.recorded_seeks(), vec![10, 20]);
    // Still seekable; the switch is one-way.
    assert_eq!(fx.stream.phase(), Phase::Seekable);
}

#[tokio::test]
async fn explicit_seek_after_complete_cache_builds_seekable() {
    let fx = fixture(complete_cache("direct"));

    // No completion callback ran, but the cache reports complete, so the
    // seek constructs the seekable decoder directly.
    assert_eq!(fx.stream.seek(777).unwrap(), SeekOutcome::Applied);
    assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 1);
    assert_eq!(fx.seekable.recorded_seeks(), vec![777]);
    assert!(fx.streaming.was_closed());
}

#[tokio::test]
async fn info_reports_authoritative_params_after_transition() {
    let fx = fixture(incomplete_cache("info"));

    let info = fx.stream.info();
    assert_eq!(info.stream_id, 1);
    assert_eq!(info.format, "mp3");
    assert_eq!(info.total_frames, 0);
    assert!(!info.can_seek);

    fx.stream.handle_cache_complete();
    let info = fx.stream.info();
    assert_eq!(info.sample_rate, 44_100);
    assert_eq!(info.channels, 2);
    assert_eq!(info.total_frames, 441_000);
    assert!(info.can_seek);

    let json = serde_json::to_value(&info).unwrap();
    assert!(json.get("streamId").is_some());
    assert!(json.get("isEOF").is_some());
    assert!(json.get("canSeek").is_some());
    assert!(json.get("error").is_none());
}

#[tokio::test]
async fn close_tears_down_and_fails_reads() {
    let fx = fixture(incomplete_cache("close"));

    fx.stream.close();
    assert_eq!(fx.stream.phase(), Phase::Closed);
    assert!(fx.streaming.was_closed());
    assert!(!fx.stream.is_ready());
    assert_eq!(read(&fx.stream, 8).0, ReadStatus::Failed);

    // Idempotent; late completion callbacks are ignored.
    fx.stream.close();
    fx.stream.handle_cache_complete();
    assert_eq!(fx.factory_calls.load(Ordering::SeqCst), 0);
    assert_eq!(fx.stream.phase(), Phase::Closed);
}

#[tokio::test]
async fn seek_after_close_reports_not_found() {
    let fx = fixture(incomplete_cache("closed-seek"));
    fx.stream.close();
    assert!(fx.stream.seek(1).is_err());
}
