//! # Cadenza Service Client
//!
//! Thin client for the remote music service: resolving a track id and
//! quality level to a downloadable URL, and storing the session cookie the
//! host obtained through its own login flow.
//!
//! The playback pipeline consumes this crate only through the
//! [`TrackResolver`] trait, so hosts can substitute their own resolution
//! (a proxy, a test fixture, a different service) without touching the
//! audio path.

pub mod credentials;
pub mod error;
pub mod resolver;
pub mod types;

pub use credentials::CredentialStore;
pub use error::{Result, ServiceError};
pub use resolver::{HttpTrackResolver, TrackResolver};
pub use types::{Quality, TrackSource};
