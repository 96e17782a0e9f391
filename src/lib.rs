//! Workspace placeholder crate.
//!
//! This crate exists to expose shared feature flags that map to the
//! individual workspace crates (`cadenza-playback`, `cadenza-service`).
//! Host build systems can depend on `cadenza` and enable the documented
//! features without wiring each crate individually. The shared library
//! itself is produced by `cadenza-ffi`.

#[cfg(feature = "playback")]
pub use cadenza_playback as playback;

#[cfg(feature = "service")]
pub use cadenza_service as service;
