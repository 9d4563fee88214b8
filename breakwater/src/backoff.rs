//! Backoff delays with optional full jitter.
//!
//! Delays are pure functions of the attempt number and the retry config,
//! plus a [`RandomSource`] when jitter is enabled. Seeding the source makes
//! the sequence reproducible.

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::time::Duration;

use crate::config::RetryConfig;

/// Backoff strategy for retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffType {
    /// delay = base
    #[default]
    Constant,
    /// delay = base * attempt
    Linear,
    /// delay = base * 2^(attempt - 1)
    Exponential,
}

impl BackoffType {
    /// Calculates the un-jittered delay after the given 1-based attempt.
    #[must_use]
    pub fn delay(self, attempt: u32, base: Duration) -> Duration {
        let attempt = attempt.max(1);
        match self {
            Self::Constant => base,
            Self::Linear => base.saturating_mul(attempt),
            Self::Exponential => base.saturating_mul(2u32.saturating_pow(attempt - 1)),
        }
    }
}

/// A source of uniform fractions in `[0, 1]`.
pub trait RandomSource: Send + Sync + Debug {
    /// Returns the next fraction.
    fn next_fraction(&self) -> f64;
}

/// Thread-local randomness.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_fraction(&self) -> f64 {
        rand::thread_rng().gen_range(0.0..=1.0)
    }
}

/// Deterministic randomness from a fixed seed.
#[derive(Debug)]
pub struct SeededRandom {
    rng: Mutex<StdRng>,
}

impl SeededRandom {
    /// Creates a source seeded with `seed`.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_fraction(&self) -> f64 {
        self.rng.lock().gen_range(0.0..=1.0)
    }
}

/// Scales `delay` by a random fraction in `[0, 1]`.
#[must_use]
pub fn full_jitter(delay: Duration, random: &dyn RandomSource) -> Duration {
    delay.mul_f64(random.next_fraction().clamp(0.0, 1.0))
}

/// Computes the delay to wait after the given 1-based attempt.
#[must_use]
pub fn next_delay(attempt: u32, config: &RetryConfig, random: &dyn RandomSource) -> Duration {
    let delay = config
        .backoff_type
        .delay(attempt, config.base_delay())
        .min(config.max_delay());

    if config.jitter {
        full_jitter(delay, random)
    } else {
        delay
    }
}
