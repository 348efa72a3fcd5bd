//! Reconnect Backoff
//!
//! Bounded exponential backoff with uniform jitter for the push channel.
//! The delay grows by `factor` per consecutive failure up to `max`, and a
//! successful open resets the sequence. Jitter keeps a fleet of clients
//! from reconnecting in lockstep after a server restart.

use rand::Rng;
use std::time::Duration;

use crate::config::CoreConfig;

/// Backoff schedule state for one connection attempt sequence.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    factor: f64,
    jitter: f64,
    attempt: u32,
}

impl Backoff {
    /// Build a schedule from the core configuration
    pub fn from_config(config: &CoreConfig) -> Self {
        Self {
            base: config.backoff_base,
            max: config.backoff_max,
            factor: config.backoff_factor,
            jitter: config.backoff_jitter.clamp(0.0, 1.0),
            attempt: 0,
        }
    }

    /// Number of consecutive failures so far
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// The delay before the next reconnect attempt; advances the schedule
    pub fn next_delay(&mut self) -> Duration {
        let nominal = self.nominal_for(self.attempt);
        self.attempt = self.attempt.saturating_add(1);

        if self.jitter == 0.0 {
            return nominal;
        }
        let scale = rand::thread_rng().gen_range(1.0 - self.jitter..=1.0 + self.jitter);
        Duration::from_secs_f64(nominal.as_secs_f64() * scale)
    }

    /// Reset after a successful open
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    fn nominal_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.as_secs_f64() * self.factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max.as_secs_f64()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_jitter() -> Backoff {
        Backoff::from_config(&CoreConfig {
            backoff_jitter: 0.0,
            ..CoreConfig::default()
        })
    }

    #[test]
    fn test_delays_grow_to_ceiling() {
        let mut backoff = no_jitter();
        let mut last = Duration::ZERO;
        for _ in 0..10 {
            let delay = backoff.next_delay();
            assert!(delay >= last);
            last = delay;
        }
        assert_eq!(last, Duration::from_secs(15));
    }

    #[test]
    fn test_reset_returns_to_base() {
        let mut backoff = no_jitter();
        for _ in 0..5 {
            backoff.next_delay();
        }
        backoff.reset();
        assert_eq!(backoff.next_delay(), Duration::from_millis(700));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let config = CoreConfig::default();
        for _ in 0..100 {
            let mut backoff = Backoff::from_config(&config);
            let delay = backoff.next_delay().as_secs_f64();
            let nominal = config.backoff_base.as_secs_f64();
            assert!(delay >= nominal * (1.0 - config.backoff_jitter) - f64::EPSILON);
            assert!(delay <= nominal * (1.0 + config.backoff_jitter) + f64::EPSILON);
        }
    }
}
