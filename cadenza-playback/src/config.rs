//! Stream configuration.
//!
//! Buffering and readiness knobs shared by the streaming decoders and the
//! per-stream background tasks.

use std::time::Duration;

/// Configuration for a PCM stream and its decoders.
#[derive(Debug, Clone, Copy)]
pub struct StreamConfig {
    /// Amount of buffered PCM required before a streaming decoder reports
    /// ready (default: 500 ms).
    pub ready_duration: Duration,

    /// Absolute floor on the ready threshold, in samples (default: 44,100).
    pub min_ready_samples: usize,

    /// High-water mark for a streaming decoder's sample buffer; the producer
    /// backs off above this level (default: 1 MiB of f32 samples).
    pub max_buffered_samples: usize,

    /// Delay before reattempting to open a partially downloaded file
    /// (default: 100 ms).
    pub reopen_delay: Duration,

    /// Interval between attempts to parse the FLAC header from the growing
    /// cache file (default: 100 ms).
    pub open_poll_interval: Duration,

    /// Maximum number of header-parse attempts before giving up
    /// (default: 200, i.e. 20 s at the default interval).
    pub open_poll_attempts: u32,

    /// Sleep applied by a producer task when its buffer is full
    /// (default: 10 ms).
    pub producer_idle: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            ready_duration: Duration::from_millis(500),
            min_ready_samples: 44_100,
            max_buffered_samples: 1024 * 1024 / std::mem::size_of::<f32>(),
            reopen_delay: Duration::from_millis(100),
            open_poll_interval: Duration::from_millis(100),
            open_poll_attempts: 200,
            producer_idle: Duration::from_millis(10),
        }
    }
}

impl StreamConfig {
    /// Number of buffered samples required for readiness at the given
    /// decoded signal parameters.
    pub fn ready_samples(&self, sample_rate: u32, channels: u16) -> usize {
        let from_duration =
            (sample_rate as f64 * channels as f64 * self.ready_duration.as_secs_f64()) as usize;
        from_duration.max(self.min_ready_samples)
    }

    /// Validate that the configuration is internally consistent.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_buffered_samples < self.min_ready_samples {
            return Err(format!(
                "max_buffered_samples ({}) must be at least min_ready_samples ({})",
                self.max_buffered_samples, self.min_ready_samples
            ));
        }
        if self.ready_duration.is_zero() {
            return Err("ready_duration must be non-zero".to_string());
        }
        Ok(())
    }
}
