//! Logging bootstrap.
//!
//! Installs a `tracing-subscriber` pipeline once, during engine
//! initialization. The filter comes from the `CADENZA_LOG` environment
//! variable (standard `EnvFilter` syntax), defaulting to `info`.

use tracing_subscriber::EnvFilter;

pub(crate) fn init() {
    let filter = EnvFilter::try_from_env("CADENZA_LOG").unwrap_or_else(|_| EnvFilter::new("info"));

    // A host may embed several engines across reloads; only the first
    // subscriber wins and later attempts are ignored.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .compact()
        .try_init();
}
