//! Self-releasing rate limiter
//!
//! Bounds how many admissions happen per time unit without any manual
//! release: each admission acquires a permit from a dedicated [`Semaphore`]
//! and schedules a detached task that gives the permit back once the pacing
//! delay has elapsed. Callers only ever wait to get in; they never hand
//! anything back.
//!
//! Correctness rests solely on the release happening *no earlier than* the
//! computed delay, never on timer precision.

use std::time::Duration;

use tracing::trace;

use crate::error::{PaceError, Result};
use crate::semaphore::{Semaphore, Token};
use crate::throttle::DEFAULT_INTERVAL;

/// A self-releasing admission gate bounding requests per time unit
///
/// Clones share the same permit pool, so a limiter can be handed to many
/// tasks.
///
/// # Example
///
/// ```rust,no_run
/// use compio_pace::RateLimiter;
///
/// # async fn example() -> compio_pace::Result<()> {
/// // At most 5 admissions per second, bursts allowed
/// let limiter = RateLimiter::new(5);
///
/// for _ in 0..20 {
///     limiter.admit().await?;
///     // ... rate-limited request ...
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct RateLimiter {
    semaphore: Semaphore<Token>,
    delay: Duration,
}

impl RateLimiter {
    /// Create a bursty rate limiter over the default 1000ms time unit
    ///
    /// Up to `rps` admissions proceed immediately; each permit returns one
    /// time unit after its grant.
    ///
    /// # Panics
    ///
    /// Panics if `rps` is 0.
    #[must_use]
    pub fn new(rps: usize) -> Self {
        assert!(rps > 0, "rate limiter must admit at least one request");
        Self {
            semaphore: Semaphore::new(rps),
            delay: DEFAULT_INTERVAL,
        }
    }

    /// Start building a rate limiter with non-default options
    ///
    /// Defaults: 1000ms time unit, bursty distribution.
    #[must_use]
    pub fn builder(rps: usize) -> RateLimiterBuilder {
        RateLimiterBuilder {
            rps,
            time_unit: DEFAULT_INTERVAL,
            uniform: false,
        }
    }

    /// Wait until within rate, then proceed
    ///
    /// Resolves as soon as a permit is acquired. The permit is released by a
    /// detached background task once the pacing delay elapses; the caller
    /// does not release anything and is not slowed down by the timer.
    ///
    /// # Errors
    ///
    /// Propagates acquire failures (unreachable through the built-in
    /// operations).
    pub async fn admit(&self) -> Result<()> {
        let token = self.semaphore.acquire().await?;
        trace!(delay_ms = self.delay.as_millis() as u64, "admission granted");

        let semaphore = self.semaphore.clone();
        let delay = self.delay;
        compio::runtime::spawn(async move {
            compio::time::sleep(delay).await;
            semaphore.release(token);
        })
        .detach();

        Ok(())
    }
}

/// Builder for a [`RateLimiter`]
pub struct RateLimiterBuilder {
    rps: usize,
    time_unit: Duration,
    uniform: bool,
}

impl RateLimiterBuilder {
    /// Set the time unit the rate is measured against (default 1000ms)
    #[must_use]
    pub fn time_unit(mut self, time_unit: Duration) -> Self {
        self.time_unit = time_unit;
        self
    }

    /// Choose the distribution mode (default bursty)
    ///
    /// Uniform: one permit, admissions spaced `time_unit / rps` apart.
    /// Bursty: `rps` permits, each returning a full time unit after grant.
    #[must_use]
    pub fn uniform(mut self, uniform: bool) -> Self {
        self.uniform = uniform;
        self
    }

    /// Build the rate limiter
    ///
    /// # Errors
    ///
    /// Returns [`PaceError::ZeroPermits`] if `rps` is 0.
    pub fn build(self) -> Result<RateLimiter> {
        if self.rps == 0 {
            return Err(PaceError::ZeroPermits);
        }
        let (permits, delay) = if self.uniform {
            (1, self.time_unit / u32::try_from(self.rps).unwrap_or(u32::MAX))
        } else {
            (self.rps, self.time_unit)
        };
        Ok(RateLimiter {
            semaphore: Semaphore::builder(permits).build()?,
            delay,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_builder_rejects_zero_rate() {
        let result = RateLimiter::builder(0).build();
        assert_eq!(result.err(), Some(PaceError::ZeroPermits));
    }

    #[test]
    fn test_burst_mode_pool_size_and_delay() {
        let limiter = RateLimiter::builder(5)
            .time_unit(Duration::from_millis(200))
            .build()
            .unwrap();
        assert_eq!(limiter.semaphore.available_permits(), 5);
        assert_eq!(limiter.delay, Duration::from_millis(200));
    }

    #[test]
    fn test_uniform_mode_pool_size_and_delay() {
        let limiter = RateLimiter::builder(4)
            .time_unit(Duration::from_millis(200))
            .uniform(true)
            .build()
            .unwrap();
        assert_eq!(limiter.semaphore.available_permits(), 1);
        assert_eq!(limiter.delay, Duration::from_millis(50));
    }

    #[compio::test]
    async fn test_burst_admits_then_blocks_until_time_unit() {
        let limiter = RateLimiter::builder(5)
            .time_unit(Duration::from_millis(60))
            .build()
            .unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit().await.unwrap();
        }
        // The whole burst goes through without waiting on the timer
        assert!(
            start.elapsed() < Duration::from_millis(50),
            "burst was delayed: {:?}",
            start.elapsed()
        );

        // The sixth admission waits for the first permit to come back
        limiter.admit().await.unwrap();
        assert!(
            start.elapsed() >= Duration::from_millis(50),
            "sixth admission too early: {:?}",
            start.elapsed()
        );
    }

    #[compio::test]
    async fn test_uniform_spacing_lower_bound() {
        // 4 admissions per 80ms: one every 20ms
        let limiter = RateLimiter::builder(4)
            .time_unit(Duration::from_millis(80))
            .uniform(true)
            .build()
            .unwrap();

        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit().await.unwrap();
        }
        // First admission is immediate; the next four each wait ~20ms
        assert!(
            start.elapsed() >= Duration::from_millis(70),
            "elapsed {:?} < 70ms",
            start.elapsed()
        );
    }

    #[compio::test]
    async fn test_clones_share_the_rate() {
        let limiter = RateLimiter::builder(1)
            .time_unit(Duration::from_millis(50))
            .build()
            .unwrap();
        let other = limiter.clone();

        let start = Instant::now();
        limiter.admit().await.unwrap();
        other.admit().await.unwrap();
        // The clone's admission counts against the same pool
        assert!(
            start.elapsed() >= Duration::from_millis(40),
            "elapsed {:?} < 40ms",
            start.elapsed()
        );
    }
}
