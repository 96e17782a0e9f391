//! Service data types.

use crate::error::ServiceError;
use cadenza_playback::Container;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Requested audio quality level.
///
/// Passed through to the service; the container type of the resolved URL
/// decides which decoder family plays it (lossless levels usually come back
/// as FLAC, the rest as MP3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Standard,
    Higher,
    Exhigh,
    Lossless,
    Hires,
}

impl Quality {
    /// Label used on the wire and in cache fingerprints.
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Standard => "standard",
            Quality::Higher => "higher",
            Quality::Exhigh => "exhigh",
            Quality::Lossless => "lossless",
            Quality::Hires => "hires",
        }
    }
}

impl Default for Quality {
    fn default() -> Self {
        Quality::Exhigh
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = ServiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Quality::Standard),
            "higher" => Ok(Quality::Higher),
            "" | "exhigh" => Ok(Quality::Exhigh),
            "lossless" => Ok(Quality::Lossless),
            "hires" => Ok(Quality::Hires),
            other => Err(ServiceError::UnknownQuality(other.to_string())),
        }
    }
}

/// A resolved track: where to download it and what it contains.
#[derive(Debug, Clone)]
pub struct TrackSource {
    pub url: String,
    pub size: Option<u64>,
    pub container: Container,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quality_labels_round_trip() {
        for quality in [
            Quality::Standard,
            Quality::Higher,
            Quality::Exhigh,
            Quality::Lossless,
            Quality::Hires,
        ] {
            assert_eq!(quality.as_str().parse::<Quality>().unwrap(), quality);
        }
    }

    #[test]
    fn empty_label_defaults_to_exhigh() {
        assert_eq!("".parse::<Quality>().unwrap(), Quality::Exhigh);
    }

    #[test]
    fn unknown_label_is_rejected() {
        assert!("ultra".parse::<Quality>().is_err());
    }
}
