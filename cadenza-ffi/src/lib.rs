//! # Cadenza C ABI
//!
//! C-compatible function surface of the playback engine, loaded by the host
//! as a shared library.
//!
//! ## Conventions
//!
//! - All strings crossing the boundary are null-terminated UTF-8.
//! - Strings returned by the library are heap-allocated and must be
//!   released with [`cadenza_free_string`].
//! - PCM buffers are raw `f32` pointers plus a frame count; the library
//!   writes `frames × channels` interleaved samples.
//! - Failing calls return a negative code (or null) and record a message in
//!   the process-wide last-error slot. The slot is overwritten by the most
//!   recent failing call, so a disciplined host reads it immediately after
//!   a failure return.
//!
//! # Safety
//!
//! All pointer-taking functions are `unsafe` by nature of the C FFI.
//! Callers must pass valid pointers, keep PCM buffers large enough for the
//! requested frame count, and never use a string pointer after freeing it.

mod logging;

use cadenza_playback::{PcmStream, SeekOutcome, StreamConfig, StreamParams, StreamRegistry};
use cadenza_service::{CredentialStore, HttpTrackResolver, Quality, TrackResolver};
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::ffi::{CStr, CString};
use std::os::raw::c_char;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

/// Service API endpoint used when the host does not supply one.
const DEFAULT_API_BASE: &str = "https://music.cadenza.dev";

// ============================================================================
// Engine State
// ============================================================================

struct Engine {
    runtime: tokio::runtime::Runtime,
    registry: StreamRegistry,
    resolver: Arc<dyn TrackResolver>,
    credentials: Arc<CredentialStore>,
    client: reqwest::Client,
    cache_dir: PathBuf,
    config: StreamConfig,
}

static ENGINE: OnceCell<Engine> = OnceCell::new();

static LAST_ERROR: Lazy<Mutex<Option<String>>> = Lazy::new(|| Mutex::new(None));

fn engine() -> Option<&'static Engine> {
    ENGINE.get()
}

fn set_last_error(message: impl Into<String>) {
    let message = message.into();
    error!("{}", message);
    *LAST_ERROR.lock() = Some(message);
}

fn clear_last_error() {
    *LAST_ERROR.lock() = None;
}

/// Run `f` against a live stream, or record the failure and return
/// `missing`.
fn with_stream<T>(
    handle: i64,
    missing: T,
    f: impl FnOnce(&Arc<PcmStream>) -> T,
) -> T {
    let Some(engine) = engine() else {
        set_last_error("Engine not initialized");
        return missing;
    };
    match engine.registry.get(handle) {
        Some(stream) => f(&stream),
        None => {
            set_last_error(format!("Stream not found: {}", handle));
            missing
        }
    }
}

/// Copy a C string argument; `None` for null pointers or invalid UTF-8.
unsafe fn cstr_arg(ptr: *const c_char) -> Option<String> {
    if ptr.is_null() {
        return None;
    }
    unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .ok()
        .map(str::to_string)
}

/// Hand a Rust string to the host. The host releases it via
/// [`cadenza_free_string`].
fn into_c_string(s: String) -> *mut c_char {
    match CString::new(s) {
        Ok(cstring) => cstring.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

// ============================================================================
// Engine Lifecycle
// ============================================================================

/// Initialize the engine.
///
/// `data_dir` selects where cache files and credentials live; pass null or
/// an empty string for the platform default under the user data directory.
/// `api_base` overrides the service endpoint; null selects the default.
/// Returns 0 on success, -1 on failure. Initialization is idempotent.
///
/// # Safety
///
/// `data_dir` and `api_base` must each be null or a valid null-terminated
/// string.
#[no_mangle]
pub unsafe extern "C" fn cadenza_init(
    data_dir: *const c_char,
    api_base: *const c_char,
) -> i32 {
    logging::init();

    if ENGINE.get().is_some() {
        clear_last_error();
        return 0;
    }

    let data_dir = match unsafe { cstr_arg(data_dir) }.filter(|s| !s.is_empty()) {
        Some(dir) => PathBuf::from(dir),
        None => match dirs::data_local_dir() {
            Some(base) => base.join("cadenza"),
            None => {
                set_last_error("No data directory available");
                return -1;
            }
        },
    };
    let cache_dir = data_dir.join("cache");
    if let Err(e) = std::fs::create_dir_all(&cache_dir) {
        set_last_error(format!("Failed to create data directory: {}", e));
        return -1;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("cadenza")
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            set_last_error(format!("Failed to start runtime: {}", e));
            return -1;
        }
    };

    let client = match reqwest::Client::builder()
        .connect_timeout(std::time::Duration::from_secs(10))
        .user_agent("cadenza/0.1")
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            set_last_error(format!("Failed to build HTTP client: {}", e));
            return -1;
        }
    };

    let api_base = unsafe { cstr_arg(api_base) }
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| DEFAULT_API_BASE.to_string());
    let credentials = Arc::new(CredentialStore::load(&data_dir.join("cookie")));
    let resolver: Arc<dyn TrackResolver> =
        Arc::new(HttpTrackResolver::new(&api_base, Arc::clone(&credentials)));

    let engine = Engine {
        runtime,
        registry: StreamRegistry::new(),
        resolver,
        credentials,
        client,
        cache_dir,
        config: StreamConfig::default(),
    };

    if ENGINE.set(engine).is_err() {
        // Another thread won the race; both engines are equivalent.
        clear_last_error();
        return 0;
    }

    info!(data_dir = ?data_dir, "cadenza engine initialized");
    clear_last_error();
    0
}

/// Store the service session cookie obtained by the host's login flow.
/// Returns 0 on success, -1 on failure.
///
/// # Safety
///
/// `cookie` must be a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cadenza_set_credentials(cookie: *const c_char) -> i32 {
    let Some(engine) = engine() else {
        set_last_error("Engine not initialized");
        return -1;
    };
    let Some(cookie) = (unsafe { cstr_arg(cookie) }) else {
        set_last_error("Invalid cookie string");
        return -1;
    };
    match engine.credentials.set_cookie(&cookie) {
        Ok(()) => {
            clear_last_error();
            0
        }
        Err(e) => {
            set_last_error(format!("Failed to store credentials: {}", e));
            -1
        }
    }
}

// ============================================================================
// Stream Lifecycle
// ============================================================================

/// Create a PCM stream for a track. Resolution happens synchronously, so
/// call this off the audio thread. Returns a handle ≥ 1 on success, -1 on
/// failure (consult [`cadenza_get_last_error`]).
///
/// # Safety
///
/// `quality` must be null or a valid null-terminated string.
#[no_mangle]
pub unsafe extern "C" fn cadenza_create_pcm_stream(
    track_id: i64,
    quality: *const c_char,
) -> i64 {
    let Some(engine) = engine() else {
        set_last_error("Engine not initialized");
        return -1;
    };

    let quality_label = unsafe { cstr_arg(quality) }.unwrap_or_default();
    let quality: Quality = match quality_label.parse() {
        Ok(quality) => quality,
        Err(e) => {
            set_last_error(e.to_string());
            return -1;
        }
    };

    let source = match engine
        .runtime
        .block_on(engine.resolver.resolve_track(track_id, quality))
    {
        Ok(source) => source,
        Err(e) => {
            set_last_error(format!("Track resolution failed: {}", e));
            return -1;
        }
    };

    let handle = engine.registry.allocate_handle();
    let params = StreamParams {
        track_id,
        url: source.url,
        container: source.container,
        quality: quality.as_str().to_string(),
        size: source.size,
    };
    let stream = match PcmStream::create(
        handle,
        params,
        engine.client.clone(),
        &engine.cache_dir,
        engine.runtime.handle().clone(),
        engine.config,
    ) {
        Ok(stream) => Arc::new(stream),
        Err(e) => {
            set_last_error(e.to_string());
            return -1;
        }
    };

    engine.registry.insert(handle, Arc::clone(&stream));
    stream.start();
    clear_last_error();
    handle
}

/// Close a stream: remove it from the registry and release its decoders,
/// cache handle, and background tasks.
#[no_mangle]
pub extern "C" fn cadenza_close_pcm_stream(handle: i64) {
    let Some(engine) = engine() else {
        return;
    };
    if let Some(stream) = engine.registry.remove(handle) {
        stream.close();
    }
}

// ============================================================================
// Frame Delivery & Seeking
// ============================================================================

/// Read up to `frames` frames of interleaved f32 PCM into `buf`.
///
/// Returns the number of frames written, `0` for "not ready, try again",
/// `-2` at end of stream, `-1` on error. Never blocks on I/O; safe to call
/// from the audio thread.
///
/// # Safety
///
/// `buf` must point to writable memory for at least `frames × channels`
/// f32 values (channel count per [`cadenza_get_pcm_stream_info`]).
#[no_mangle]
pub unsafe extern "C" fn cadenza_read_pcm_frames(
    handle: i64,
    buf: *mut f32,
    frames: i32,
) -> i32 {
    if buf.is_null() || frames < 0 {
        set_last_error("Invalid argument: bad buffer or frame count");
        return -1;
    }
    with_stream(handle, -1, |stream| {
        let channels = stream.channel_count();
        if channels == 0 {
            // Signal parameters unknown until the decoder is ready.
            return 0;
        }
        let samples = frames as usize * channels as usize;
        let out = unsafe { std::slice::from_raw_parts_mut(buf, samples) };
        stream.read_frames(out, frames as usize).as_code()
    })
}

/// Seek to an absolute frame index.
///
/// Returns `0` when applied, `-3` when deferred until the cache completes
/// (output pauses to silence; see [`cadenza_has_pending_seek`]), `-1` on
/// error.
#[no_mangle]
pub extern "C" fn cadenza_seek_pcm_stream(handle: i64, frame_index: i64) -> i32 {
    if frame_index < 0 {
        set_last_error("Invalid argument: negative frame index");
        return -1;
    }
    with_stream(handle, -1, |stream| match stream.seek(frame_index as u64) {
        Ok(SeekOutcome::Applied) => 0,
        Ok(SeekOutcome::Deferred) => -3,
        Err(e) => {
            set_last_error(e.to_string());
            -1
        }
    })
}

/// `1` once the seekable decoder exists, `0` before, `-1` for an unknown
/// handle.
#[no_mangle]
pub extern "C" fn cadenza_can_seek_pcm_stream(handle: i64) -> i32 {
    with_stream(handle, -1, |stream| i32::from(stream.can_seek()))
}

/// `1` once ≥ 0.5 s of PCM is buffered (or a terminal condition latched
/// readiness), `0` before, `-1` for an unknown handle.
#[no_mangle]
pub extern "C" fn cadenza_is_pcm_stream_ready(handle: i64) -> i32 {
    with_stream(handle, -1, |stream| i32::from(stream.is_ready()))
}

/// Download progress in `[0, 1]`; `-1` for an unknown handle.
#[no_mangle]
pub extern "C" fn cadenza_get_cache_progress(handle: i64) -> f64 {
    with_stream(handle, -1.0, |stream| stream.cache_progress())
}

/// `1` while a deferred seek is stored, `0` otherwise, `-1` for an unknown
/// handle.
#[no_mangle]
pub extern "C" fn cadenza_has_pending_seek(handle: i64) -> i32 {
    with_stream(handle, -1, |stream| i32::from(stream.has_pending_seek()))
}

/// Target frame of the stored deferred seek, `-1` when none.
#[no_mangle]
pub extern "C" fn cadenza_get_pending_seek_frame(handle: i64) -> i64 {
    with_stream(handle, -1, |stream| {
        stream
            .pending_seek_frame()
            .map(|frame| frame as i64)
            .unwrap_or(-1)
    })
}

/// Drop a deferred seek; live streaming output resumes from the streaming
/// decoder's current position.
#[no_mangle]
pub extern "C" fn cadenza_cancel_pending_seek(handle: i64) {
    with_stream(handle, (), |stream| stream.cancel_pending_seek());
}

// ============================================================================
// Introspection
// ============================================================================

/// Stream information as a JSON object:
/// `{streamId, sampleRate, channels, totalFrames, isReady, canSeek, isEOF,
/// format, error?}` with `format ∈ {"mp3", "flac"}`.
///
/// Returns null for an unknown handle. Free the string with
/// [`cadenza_free_string`].
#[no_mangle]
pub extern "C" fn cadenza_get_pcm_stream_info(handle: i64) -> *mut c_char {
    with_stream(handle, std::ptr::null_mut(), |stream| {
        match serde_json::to_string(&stream.info()) {
            Ok(json) => {
                clear_last_error();
                into_c_string(json)
            }
            Err(e) => {
                set_last_error(format!("Failed to serialize stream info: {}", e));
                std::ptr::null_mut()
            }
        }
    })
}

/// Error recorded on a specific stream, or null when the stream is healthy.
/// Free the string with [`cadenza_free_string`].
#[no_mangle]
pub extern "C" fn cadenza_get_pcm_stream_error(handle: i64) -> *mut c_char {
    with_stream(handle, std::ptr::null_mut(), |stream| {
        match stream.last_error() {
            Some(message) => into_c_string(message),
            None => std::ptr::null_mut(),
        }
    })
}

/// Message recorded by the most recent failing call, or null. Free the
/// string with [`cadenza_free_string`].
#[no_mangle]
pub extern "C" fn cadenza_get_last_error() -> *mut c_char {
    match LAST_ERROR.lock().clone() {
        Some(message) => into_c_string(message),
        None => std::ptr::null_mut(),
    }
}

/// Release a string previously returned by this library. Null is accepted.
///
/// # Safety
///
/// `ptr` must be null or a pointer obtained from this library, freed at
/// most once.
#[no_mangle]
pub unsafe extern "C" fn cadenza_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        drop(unsafe { CString::from_raw(ptr) });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // The engine global is process-wide, so these tests only exercise the
    // paths reachable before initialization plus the pure helpers. The
    // last-error slot is shared; tests that touch it serialize on a lock.
    static TEST_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn calls_before_init_fail_with_not_initialized() {
        let _guard = TEST_LOCK.lock();
        assert_eq!(unsafe { cadenza_create_pcm_stream(1, std::ptr::null()) }, -1);

        let err = cadenza_get_last_error();
        assert!(!err.is_null());
        let message = unsafe { CStr::from_ptr(err) }.to_str().unwrap().to_string();
        unsafe { cadenza_free_string(err) };
        assert!(message.contains("not initialized"));
    }

    #[test]
    fn unknown_handle_reads_fail() {
        let _guard = TEST_LOCK.lock();
        let mut buf = [0.0f32; 8];
        assert_eq!(
            unsafe { cadenza_read_pcm_frames(424_242, buf.as_mut_ptr(), 4) },
            -1
        );
    }

    #[test]
    fn invalid_read_arguments_are_rejected() {
        let _guard = TEST_LOCK.lock();
        assert_eq!(
            unsafe { cadenza_read_pcm_frames(1, std::ptr::null_mut(), 4) },
            -1
        );
        let mut buf = [0.0f32; 4];
        assert_eq!(unsafe { cadenza_read_pcm_frames(1, buf.as_mut_ptr(), -3) }, -1);
    }

    #[test]
    fn negative_seek_is_rejected() {
        let _guard = TEST_LOCK.lock();
        assert_eq!(cadenza_seek_pcm_stream(1, -10), -1);
    }

    #[test]
    fn free_string_accepts_null() {
        unsafe { cadenza_free_string(std::ptr::null_mut()) };
    }

    #[test]
    fn cstr_round_trip() {
        let out = into_c_string("hello".to_string());
        let back = unsafe { cstr_arg(out) };
        assert_eq!(back.as_deref(), Some("hello"));
        unsafe { cadenza_free_string(out) };
    }
}
