//! Service client error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// The HTTP request itself failed.
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service answered with a non-success business code.
    #[error("Service returned code {0}")]
    Api(i64),

    /// The track exists but no playable URL was offered.
    #[error("No URL available for track {0}")]
    NoUrl(i64),

    /// The response body did not match the expected envelope.
    #[error("Malformed response: {0}")]
    Malformed(String),

    /// Credential store I/O failure.
    #[error("Credential store error: {0}")]
    Credentials(#[from] std::io::Error),

    /// The quality label is not one of the accepted levels.
    #[error("Unknown quality level: {0}")]
    UnknownQuality(String),
}

pub type Result<T> = std::result::Result<T, ServiceError>;
