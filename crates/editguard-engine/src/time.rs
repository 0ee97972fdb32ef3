//! Suspension and jitter seams
//!
//! Backoff waits go through a [`Sleeper`] so tests can run retry sequences
//! in virtual time, and delay perturbation goes through a [`JitterSource`]
//! so they can pin it.

use async_trait::async_trait;
use editguard_core::clock::ManualClock;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Largest relative perturbation applied to a backoff delay
pub const JITTER_RATIO: f64 = 0.10;

/// Suspends the caller for a delay
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

/// Real timer backed by `tokio::time::sleep`
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Virtual timer: advances a [`ManualClock`] instead of waiting
///
/// Every requested delay is recorded in order.
#[derive(Debug, Clone)]
pub struct VirtualSleeper {
    clock: ManualClock,
    delays: Arc<Mutex<Vec<Duration>>>,
}

impl VirtualSleeper {
    pub fn new(clock: ManualClock) -> Self {
        Self {
            clock,
            delays: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Delays requested so far, oldest first
    pub fn delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .map(|d| d.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn total(&self) -> Duration {
        self.delays().iter().sum()
    }
}

#[async_trait]
impl Sleeper for VirtualSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
        let step = chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::weeks(52));
        self.clock.advance(step);
        tokio::task::yield_now().await;
    }
}

/// Source of jitter factors in `[1 - JITTER_RATIO, 1 + JITTER_RATIO]`
pub trait JitterSource: Send + Sync {
    fn factor(&self) -> f64;
}

/// Uniform jitter from a seedable generator
pub struct RandomJitter {
    rng: Mutex<StdRng>,
}

impl RandomJitter {
    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Reproducible sequence for tests and simulations
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for RandomJitter {
    fn default() -> Self {
        Self::from_entropy()
    }
}

impl JitterSource for RandomJitter {
    fn factor(&self) -> f64 {
        let mut rng = self.rng.lock().unwrap_or_else(|e| e.into_inner());
        rng.gen_range((1.0 - JITTER_RATIO)..=(1.0 + JITTER_RATIO))
    }
}

/// Constant factor, clamped into the jitter band
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub f64);

impl JitterSource for FixedJitter {
    fn factor(&self) -> f64 {
        if self.0.is_finite() {
            self.0.clamp(1.0 - JITTER_RATIO, 1.0 + JITTER_RATIO)
        } else {
            1.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use editguard_core::clock::Clock;

    #[tokio::test]
    async fn test_virtual_sleeper_advances_clock() {
        let clock = ManualClock::starting_now();
        let start = clock.now();
        let sleeper = VirtualSleeper::new(clock.clone());

        sleeper.sleep(Duration::from_millis(1500)).await;
        sleeper.sleep(Duration::from_millis(500)).await;

        assert_eq!((clock.now() - start).num_milliseconds(), 2000);
        assert_eq!(sleeper.delays().len(), 2);
        assert_eq!(sleeper.total(), Duration::from_secs(2));
    }

    #[test]
    fn test_random_jitter_stays_in_band() {
        let jitter = RandomJitter::seeded(7);
        for _ in 0..1000 {
            let f = jitter.factor();
            assert!((0.9..=1.1).contains(&f), "factor {} out of band", f);
        }
    }

    #[test]
    fn test_fixed_jitter_is_clamped() {
        assert!((FixedJitter(2.0).factor() - 1.1).abs() < 1e-9);
        assert!((FixedJitter(0.0).factor() - 0.9).abs() < 1e-9);
        assert!((FixedJitter(f64::NAN).factor() - 1.0).abs() < 1e-9);
    }
}
