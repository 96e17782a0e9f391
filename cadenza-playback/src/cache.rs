//! # Track Cache
//!
//! Write-through disk cache for one track: a background task downloads the
//! resolved URL into a fingerprinted file while decoders read the growing
//! file. Completion is delivered as a one-shot callback so consumers never
//! have to poll for it.
//!
//! Cache files persist after the owning stream closes; a later session that
//! resolves the same track and quality lands on the same path and, when the
//! existing file already has the expected size, skips the download entirely.

use crate::decoder::Container;
use crate::error::Result;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// One-shot completion callback.
type CompletionFn = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct CacheState {
    downloaded: u64,
    total: Option<u64>,
    complete: bool,
    error: Option<String>,
}

struct CacheShared {
    url: String,
    path: PathBuf,
    state: Mutex<CacheState>,
    on_complete: Mutex<Option<CompletionFn>>,
}

impl CacheShared {
    fn fail(&self, message: String) {
        warn!(path = ?self.path, "{}", message);
        self.state.lock().error = Some(message);
    }

    /// Invoke the registered completion callback, at most once.
    fn fire_on_complete(&self) {
        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }
}

/// Disk cache for a single track download.
pub struct TrackCache {
    shared: Arc<CacheShared>,
    client: reqwest::Client,
    cancel: CancellationToken,
}

impl TrackCache {
    /// Set up the cache entry for a track.
    ///
    /// The cache file path is derived from a SHA-256 fingerprint of the
    /// track id and quality, so repeated streams of the same track share a
    /// file. The file exists (possibly empty) as soon as this returns. When
    /// a previous session already downloaded the full file (its size
    /// matches `expected_size`), the entry starts out
    /// complete and `start_download` only fires the completion callback.
    pub fn new(
        client: reqwest::Client,
        url: &str,
        track_id: i64,
        quality: &str,
        container: Container,
        cache_dir: &Path,
        expected_size: Option<u64>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        std::fs::create_dir_all(cache_dir)?;
        let path = cache_dir.join(cache_file_name(track_id, quality, container));

        let mut state = CacheState::default();
        let reusable = match (expected_size, std::fs::metadata(&path)) {
            (Some(expected), Ok(meta)) => expected > 0 && meta.len() == expected,
            _ => false,
        };
        if reusable {
            let size = expected_size.unwrap_or(0);
            info!(path = ?path, size, "reusing completed cache file");
            state.downloaded = size;
            state.total = Some(size);
            state.complete = true;
        } else {
            // Truncate any stale partial download; resume is not supported.
            std::fs::File::create(&path)?;
            state.total = expected_size;
        }

        Ok(Self {
            shared: Arc::new(CacheShared {
                url: url.to_string(),
                path,
                state: Mutex::new(state),
                on_complete: Mutex::new(None),
            }),
            client,
            cancel,
        })
    }

    /// Path of the cache file. Valid immediately; the file may still be empty.
    pub fn path(&self) -> &Path {
        &self.shared.path
    }

    /// Download progress in `[0, 1]`. Reports 0 while the total size is
    /// unknown and 1 once complete.
    pub fn progress(&self) -> f64 {
        let state = self.shared.state.lock();
        if state.complete {
            return 1.0;
        }
        match state.total {
            Some(total) if total > 0 => (state.downloaded as f64 / total as f64).min(1.0),
            _ => 0.0,
        }
    }

    /// `true` once the whole file is on disk.
    pub fn is_complete(&self) -> bool {
        self.shared.state.lock().complete
    }

    /// Error recorded by the download task, if any.
    pub fn last_error(&self) -> Option<String> {
        self.shared.state.lock().error.clone()
    }

    /// Register the completion callback. Invoked exactly once, on successful
    /// end of download, or immediately if the entry is already complete.
    pub fn set_on_complete(&self, callback: impl FnOnce() + Send + 'static) {
        if self.is_complete() {
            callback();
            return;
        }
        *self.shared.on_complete.lock() = Some(Box::new(callback));
    }

    /// Begin the background download. No-op beyond firing the callback when
    /// the entry was reused from a previous session.
    pub fn start_download(&self, handle: &Handle) {
        if self.is_complete() {
            self.shared.fire_on_complete();
            return;
        }
        let shared = Arc::clone(&self.shared);
        let client = self.client.clone();
        let cancel = self.cancel.clone();
        handle.spawn(run_download(shared, client, cancel));
    }

    /// Cancel the download. Already-written bytes stay on disk.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// Stable cache file name for a (track, quality) pair.
fn cache_file_name(track_id: i64, quality: &str, container: Container) -> String {
    let mut hasher = Sha256::new();
    hasher.update(track_id.to_le_bytes());
    hasher.update(b":");
    hasher.update(quality.as_bytes());
    let digest = hasher.finalize();

    let mut name = String::with_capacity(digest.len() * 2 + 8);
    for byte in digest {
        name.push_str(&format!("{:02x}", byte));
    }
    name.push('.');
    name.push_str(container.extension());
    name
}

async fn run_download(
    shared: Arc<CacheShared>,
    client: reqwest::Client,
    cancel: CancellationToken,
) {
    debug!(url = %shared.url, "starting cache download");

    let mut response = match client.get(&shared.url).send().await {
        Ok(response) => response,
        Err(e) => {
            shared.fail(format!("request failed: {}", e));
            return;
        }
    };
    if !response.status().is_success() {
        shared.fail(format!("HTTP status {}", response.status()));
        return;
    }
    if let Some(len) = response.content_length() {
        shared.state.lock().total = Some(len);
    }

    let mut file = match tokio::fs::OpenOptions::new()
        .write(true)
        .truncate(true)
        .open(&shared.path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            shared.fail(format!("failed to open cache file: {}", e));
            return;
        }
    };

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => {
                debug!(path = ?shared.path, "cache download cancelled");
                return;
            }
            chunk = response.chunk() => chunk,
        };

        match chunk {
            Ok(Some(bytes)) => {
                if let Err(e) = file.write_all(&bytes).await {
                    shared.fail(format!("cache write failed: {}", e));
                    return;
                }
                // Flush per chunk so readers observe every appended byte.
                if let Err(e) = file.flush().await {
                    shared.fail(format!("cache flush failed: {}", e));
                    return;
                }
                shared.state.lock().downloaded += bytes.len() as u64;
            }
            Ok(None) => {
                let finished = {
                    let mut state = shared.state.lock();
                    match state.total {
                        Some(total) if state.downloaded < total => {
                            state.error = Some(format!(
                                "connection closed at {} of {} bytes",
                                state.downloaded, total
                            ));
                            false
                        }
                        _ => {
                            let downloaded = state.downloaded;
                            state.total.get_or_insert(downloaded);
                            state.complete = true;
                            true
                        }
                    }
                };
                if finished {
                    info!(path = ?shared.path, "cache download complete");
                    shared.fire_on_complete();
                }
                return;
            }
            Err(e) => {
                shared.fail(format!("download failed: {}", e));
                return;
            }
        }
    }
}
