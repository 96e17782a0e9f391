//! # Playback Error Types
//!
//! Error taxonomy for the streaming audio pipeline.

use thiserror::Error;

/// Errors that can occur in the playback pipeline.
#[derive(Error, Debug)]
pub enum PlaybackError {
    /// An engine entry point was called before initialization.
    #[error("Engine not initialized")]
    NotInitialized,

    /// The stream handle does not refer to a live stream.
    #[error("Stream not found: {0}")]
    NotFound(i64),

    /// A track URL could not be obtained from the service.
    #[error("Track resolution failed: {0}")]
    ResolutionFailed(String),

    /// A download failed mid-stream.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Malformed bitstream or unsupported codec parameters.
    #[error("Decoder error: {0}")]
    DecoderError(String),

    /// Local file failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A caller-supplied argument was rejected.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl PlaybackError {
    /// Returns `true` if this error originated in the network layer.
    pub fn is_network_error(&self) -> bool {
        matches!(
            self,
            PlaybackError::NetworkError(_) | PlaybackError::ResolutionFailed(_)
        )
    }

    /// Returns `true` if this error indicates a bad bitstream rather than an
    /// environment failure.
    pub fn is_decode_error(&self) -> bool {
        matches!(self, PlaybackError::DecoderError(_))
    }
}

/// Result type for playback operations.
pub type Result<T> = std::result::Result<T, PlaybackError>;
