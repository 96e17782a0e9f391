//! Download behavior of `TrackCache` against a minimal in-test HTTP server.

use cadenza_playback::{Container, TrackCache};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn cache_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "cadenza-cache-tests-{}-{}",
        tag,
        std::process::id()
    ));
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

/// Serve one GET request: send headers claiming `claimed_len` bytes, then
/// write `body` in `chunk_size` pieces with `delay` between them, then
/// close the connection.
async fn serve_once(
    body: Vec<u8>,
    claimed_len: usize,
    chunk_size: usize,
    delay: Duration,
) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        let (mut socket, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(_) => return,
        };
        let mut request = [0u8; 2048];
        let _ = socket.read(&mut request).await;

        let header = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            claimed_len
        );
        if socket.write_all(header.as_bytes()).await.is_err() {
            return;
        }
        for chunk in body.chunks(chunk_size) {
            if socket.write_all(chunk).await.is_err() {
                return;
            }
            let _ = socket.flush().await;
            tokio::time::sleep(delay).await;
        }
        let _ = socket.shutdown().await;
    });

    format!("http://{}/track.mp3", addr)
}

async fn wait_until(deadline: Duration, mut probe: impl FnMut() -> bool) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if probe() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn download_completes_and_fires_callback_once() {
    let body: Vec<u8> = (0..=255u8).cycle().take(4096).collect();
    let url = serve_once(body.clone(), body.len(), 512, Duration::from_millis(1)).await;

    let cache = TrackCache::new(
        reqwest::Client::new(),
        &url,
        100,
        "exhigh",
        Container::Mp3,
        &cache_dir("complete"),
        None,
        CancellationToken::new(),
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    cache.set_on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    cache.start_download(&tokio::runtime::Handle::current());

    assert!(wait_until(Duration::from_secs(5), || cache.is_complete()).await);
    assert_eq!(cache.progress(), 1.0);
    assert_eq!(fired.load(Ordering::SeqCst), 1);
    assert!(cache.last_error().is_none());
    assert_eq!(std::fs::read(cache.path()).unwrap(), body);
}

#[tokio::test]
async fn progress_is_monotone_until_complete() {
    let body = vec![7u8; 8192];
    let url = serve_once(body.clone(), body.len(), 1024, Duration::from_millis(10)).await;

    let cache = TrackCache::new(
        reqwest::Client::new(),
        &url,
        101,
        "exhigh",
        Container::Mp3,
        &cache_dir("monotone"),
        None,
        CancellationToken::new(),
    )
    .unwrap();
    cache.start_download(&tokio::runtime::Handle::current());

    let mut last = 0.0f64;
    let observed_monotone = wait_until(Duration::from_secs(5), || {
        let progress = cache.progress();
        assert!(progress >= last, "progress regressed: {} < {}", progress, last);
        last = progress;
        cache.is_complete()
    })
    .await;
    assert!(observed_monotone);
    assert_eq!(cache.progress(), 1.0);
}

#[tokio::test]
async fn truncated_download_records_error_and_keeps_bytes() {
    // Claim more bytes than are ever sent; the connection then closes.
    let body = vec![3u8; 1024];
    let url = serve_once(body, 4096, 512, Duration::from_millis(1)).await;

    let cache = TrackCache::new(
        reqwest::Client::new(),
        &url,
        102,
        "exhigh",
        Container::Mp3,
        &cache_dir("truncated"),
        None,
        CancellationToken::new(),
    )
    .unwrap();

    let fired = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&fired);
    cache.set_on_complete(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    cache.start_download(&tokio::runtime::Handle::current());

    assert!(wait_until(Duration::from_secs(5), || cache.last_error().is_some()).await);
    assert!(!cache.is_complete());
    assert_eq!(fired.load(Ordering::SeqCst), 0);
    // Bytes already downloaded are retained for the decoders.
    assert!(std::fs::metadata(cache.path()).unwrap().len() > 0);
}

#[tokio::test]
async fn close_cancels_the_download() {
    // A slow body that would take far longer than the test.
    let body = vec![9u8; 64 * 1024];
    let url = serve_once(body, 64 * 1024, 512, Duration::from_millis(50)).await;

    let cancel = CancellationToken::new();
    let cache = TrackCache::new(
        reqwest::Client::new(),
        &url,
        103,
        "exhigh",
        Container::Mp3,
        &cache_dir("cancel"),
        None,
        cancel,
    )
    .unwrap();
    cache.start_download(&tokio::runtime::Handle::current());

    // Let a little data land, then cancel.
    tokio::time::sleep(Duration::from_millis(120)).await;
    cache.close();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let len_after_close = std::fs::metadata(cache.path()).unwrap().len();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert!(!cache.is_complete());
    // No further bytes arrive once the task observed cancellation.
    assert_eq!(std::fs::metadata(cache.path()).unwrap().len(), len_after_close);
}
