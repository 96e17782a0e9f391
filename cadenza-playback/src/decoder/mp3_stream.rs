//! # Streaming MP3 Decoder
//!
//! Decodes MP3 audio directly from the network, independent of the disk
//! cache: MP3 frame headers can be decoded from any stream offset with a
//! small prefix, so playback can start as soon as half a second of PCM has
//! been produced.
//!
//! Two background tasks cooperate: an async network task feeds response
//! bytes through a bounded channel, and a blocking decode task pulls them
//! through an `io::Read` adapter into the packet decoder, appending
//! interleaved f32 samples to the shared buffer that `read_frames` drains.

use crate::config::StreamConfig;
use crate::decoder::{decode_next, open_format, Container, PcmSource, ReadStatus, SourceSpec};
use bytes::{Buf, Bytes};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const CHUNK_CHANNEL_CAPACITY: usize = 32;

#[derive(Default)]
struct DecodeState {
    samples: VecDeque<f32>,
    sample_rate: u32,
    channels: u16,
    ready: bool,
    eof: bool,
    error: Option<String>,
}

struct StreamShared {
    state: Mutex<DecodeState>,
}

impl StreamShared {
    /// Record a terminal failure. Readiness latches too, so the host never
    /// waits forever on a stream that can no longer produce data.
    fn fail(&self, message: String) {
        warn!("mp3 stream failed: {}", message);
        let mut state = self.state.lock();
        state.error = Some(message);
        state.eof = true;
        state.ready = true;
    }
}

/// Streaming MP3 decoder fed by its own HTTP request.
pub struct Mp3StreamingDecoder {
    shared: Arc<StreamShared>,
    client: reqwest::Client,
    url: String,
    config: StreamConfig,
    cancel: CancellationToken,
}

impl Mp3StreamingDecoder {
    pub fn new(
        client: reqwest::Client,
        url: String,
        config: StreamConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(StreamShared {
                state: Mutex::new(DecodeState::default()),
            }),
            client,
            url,
            config,
            cancel,
        }
    }

    /// Spawn the network and decode tasks. Call once.
    pub fn start(&self, handle: &Handle) {
        let (tx, rx) = mpsc::channel::<Bytes>(CHUNK_CHANNEL_CAPACITY);

        handle.spawn(run_fetch(
            self.client.clone(),
            self.url.clone(),
            tx,
            Arc::clone(&self.shared),
            self.cancel.clone(),
        ));

        let shared = Arc::clone(&self.shared);
        let cancel = self.cancel.clone();
        let config = self.config;
        handle.spawn_blocking(move || run_decode(shared, rx, cancel, config));
    }
}

impl PcmSource for Mp3StreamingDecoder {
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

async fn run_fetch(
    client: reqwest::Client,
    url: String,
    tx: mpsc::Sender<Bytes>,
    shared: Arc<StreamShared>,
    cancel: CancellationToken,
) {
    debug!(url = %url, "starting mp3 network task");

    let mut response = match client.get(&url).send().await {
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

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return,
            chunk = response.chunk() => chunk,
        };
        match chunk {
            // Dropping the sender ends the decode side's input.
            Ok(Some(bytes)) => {
                if tx.send(bytes).await.is_err() {
                    return;
                }
            }
            Ok(None) => return,
            Err(e) => {
                shared.fail(format!("download failed: {}", e));
                return;
            }
        }
    }
}

fn run_decode(
    shared: Arc<StreamShared>,
    rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    config: StreamConfig,
) {
    let reader = ChannelReader::new(rx);
    let source = MediaSourceStream::new(
        Box::new(ReadOnlySource::new(reader)),
        Default::default(),
    );

    let mut fmt = match open_format(source, Container::Mp3) {
        Ok(fmt) => fmt,
        Err(e) => {
            shared.fail(e.to_string());
            return;
        }
    };

    let ready_target = config.ready_samples(fmt.spec.sample_rate, fmt.spec.channels);
    {
        let mut state = shared.state.lock();
        state.sample_rate = fmt.spec.sample_rate;
        state.channels = fmt.spec.channels;
    }
    debug!(
        sample_rate = fmt.spec.sample_rate,
        channels = fmt.spec.channels,
        "mp3 stream opened"
    );

    loop {
        if cancel.is_cancelled() {
            return;
        }

        // Back-pressure: let the consumer catch up before decoding more.
        while shared.state.lock().samples.len() > config.max_buffered_samples {
            if cancel.is_cancelled() {
                return;
            }
            std::thread::sleep(config.producer_idle);
        }

        match decode_next(&mut fmt) {
            Ok(Some(pcm)) => {
                let mut state = shared.state.lock();
                state.samples.extend(pcm);
                if !state.ready && state.samples.len() >= ready_target {
                    state.ready = true;
                    debug!(buffered = state.samples.len(), "mp3 stream ready");
                }
            }
            Ok(None) => {
                let mut state = shared.state.lock();
                state.eof = true;
                state.ready = true;
                debug!("mp3 stream ended");
                return;
            }
            Err(e) => {
                shared.fail(e.to_string());
                return;
            }
        }
    }
}

/// Blocking `io::Read` over the bytes flowing out of the network task.
struct ChannelReader {
    rx: mpsc::Receiver<Bytes>,
    current: Bytes,
}

impl ChannelReader {
    fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self {
            rx,
            current: Bytes::new(),
        }
    }
}

impl io::Read for ChannelReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        while self.current.is_empty() {
            match self.rx.blocking_recv() {
                Some(bytes) => self.current = bytes,
                None => return Ok(0),
            }
        }
        let n = buf.len().min(self.current.len());
        buf[..n].copy_from_slice(&self.current[..n]);
        self.current.advance(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    #[test]
    fn channel_reader_concatenates_chunks() {
        let (tx, rx) = mpsc::channel(4);
        tx.blocking_send(Bytes::from_static(b"hel")).unwrap();
        tx.blocking_send(Bytes::from_static(b"lo")).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, b"hello");
    }

    #[test]
    fn channel_reader_reports_eof_after_sender_drop() {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut buf = [0u8; 16];
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn channel_reader_handles_partial_reads() {
        let (tx, rx) = mpsc::channel(1);
        tx.blocking_send(Bytes::from_static(b"abcdef")).unwrap();
        drop(tx);

        let mut reader = ChannelReader::new(rx);
        let mut buf = [0u8; 4];
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(reader.read(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
    }

    #[test]
    fn read_before_ready_is_pending() {
        let decoder = Mp3StreamingDecoder::new(
            reqwest::Client::new(),
            "http://localhost/never".to_string(),
            StreamConfig::default(),
            CancellationToken::new(),
        );

        let mut out = [0.0f32; 64];
        assert_eq!(decoder.read_frames(&mut out, 32), ReadStatus::Pending);
    }

    #[test]
    fn failure_latches_ready_and_surfaces_error() {
        let decoder = Mp3StreamingDecoder::new(
            reqwest::Client::new(),
            "http://localhost/never".to_string(),
            StreamConfig::default(),
            CancellationToken::new(),
        );
        decoder.shared.fail("boom".to_string());

        assert!(decoder.is_ready());
        assert!(decoder.is_eof());
        let mut out = [0.0f32; 4];
        assert_eq!(decoder.read_frames(&mut out, 2), ReadStatus::Failed);
        assert_eq!(decoder.last_error().as_deref(), Some("boom"));
    }
}
