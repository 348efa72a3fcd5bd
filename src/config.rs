//! Core Configuration
//!
//! Tunable knobs for the background machinery: the periodic message poll
//! and the push-channel reconnect backoff. Defaults match the behavior the
//! application shipped with.

use std::time::Duration;

/// Configuration for the reconciliation core's background machinery.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Interval between periodic chat refresh polls
    pub poll_interval: Duration,
    /// Initial reconnect delay after an unexpected push-channel close
    pub backoff_base: Duration,
    /// Ceiling on the reconnect delay
    pub backoff_max: Duration,
    /// Multiplier applied per consecutive failed reconnect
    pub backoff_factor: f64,
    /// Uniform jitter fraction applied to each delay (0.0 to 1.0)
    pub backoff_jitter: f64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(20),
            backoff_base: Duration::from_millis(700),
            backoff_max: Duration::from_secs(15),
            backoff_factor: 2.0,
            backoff_jitter: 0.25,
        }
    }
}
