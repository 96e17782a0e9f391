//! Track URL resolution.
//!
//! The playback engine treats the music service as an opaque resolver:
//! given a track id and quality, it answers with a downloadable URL, the
//! expected size, and the container format. Everything else the service
//! offers (library, playlists, favorites) lives host-side.

use crate::credentials::CredentialStore;
use crate::error::{Result, ServiceError};
use crate::types::{Quality, TrackSource};
use async_trait::async_trait;
use cadenza_playback::Container;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Resolves a track id to a playable source.
#[async_trait]
pub trait TrackResolver: Send + Sync {
    async fn resolve_track(&self, track_id: i64, quality: Quality) -> Result<TrackSource>;
}

/// Resolver backed by the service's HTTP API.
pub struct HttpTrackResolver {
    client: reqwest::Client,
    base_url: String,
    credentials: Arc<CredentialStore>,
}

impl HttpTrackResolver {
    /// Create a resolver with a dedicated pooled client.
    pub fn new(base_url: &str, credentials: Arc<CredentialStore>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("cadenza/0.1")
            .build()
            .expect("reqwest client configuration is static");

        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
        }
    }
}

#[derive(Debug, Deserialize)]
struct SongUrlResponse {
    code: i64,
    #[serde(default)]
    data: Vec<SongUrlEntry>,
}

#[derive(Debug, Deserialize)]
struct SongUrlEntry {
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(rename = "type", default)]
    container: Option<String>,
}

#[async_trait]
impl TrackResolver for HttpTrackResolver {
    #[instrument(skip(self))]
    async fn resolve_track(&self, track_id: i64, quality: Quality) -> Result<TrackSource> {
        let url = format!(
            "{}/api/song/url/v1?id={}&level={}",
            self.base_url, track_id, quality
        );

        let mut request = self.client.get(&url);
        if let Some(cookie) = self.credentials.cookie() {
            request = request.header(reqwest::header::COOKIE, cookie);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(%status, track_id, "song url request rejected");
            return Err(ServiceError::Api(status.as_u16() as i64));
        }

        let envelope: SongUrlResponse = response.json().await?;
        if envelope.code != 200 {
            return Err(ServiceError::Api(envelope.code));
        }

        let entry = envelope
            .data
            .into_iter()
            .next()
            .ok_or_else(|| ServiceError::Malformed("empty data array".to_string()))?;

        let track_url = match entry.url {
            Some(url) if !url.is_empty() => url,
            _ => return Err(ServiceError::NoUrl(track_id)),
        };

        let container = match entry.container.as_deref() {
            Some(kind) if kind.eq_ignore_ascii_case("flac") => Container::Flac,
            _ => Container::Mp3,
        };

        debug!(
            track_id,
            size = ?entry.size,
            format = container.as_str(),
            "resolved track url"
        );

        Ok(TrackSource {
            url: track_url,
            size: entry.size,
            container,
        })
    }
}
