//! Throttled semaphore capping throughput to a rate
//!
//! Wraps a [`Semaphore`] and applies a fixed delay after each grant, before
//! the token reaches the caller. In uniform mode one caller passes through
//! every `interval / permits`, spacing grants evenly across the interval; in
//! burst mode up to `permits` callers proceed at once with no delay.
//!
//! The wrapper composes the core semaphore rather than extending it: pacing
//! lives entirely around the inner acquire call.

use std::time::Duration;

use tracing::trace;

use crate::error::{PaceError, Result};
use crate::semaphore::{Semaphore, SemaphoreBuilder, Token};

/// Default pacing interval when none is configured
pub(crate) const DEFAULT_INTERVAL: Duration = Duration::from_millis(1000);

/// A semaphore whose grants are paced to a target rate
///
/// Callers still release manually, exactly as with [`Semaphore`]; only the
/// acquire path is delayed.
///
/// # Example
///
/// ```rust,no_run
/// use compio_pace::ThrottledSemaphore;
///
/// # async fn example() -> compio_pace::Result<()> {
/// // One grant every 250ms: 4 permits spread uniformly over 1000ms
/// let throttled = ThrottledSemaphore::new(4);
///
/// let token = throttled.acquire().await?;
/// // ... paced work ...
/// throttled.release(token);
/// # Ok(())
/// # }
/// ```
pub struct ThrottledSemaphore<T = Token> {
    semaphore: Semaphore<T>,
    delay: Duration,
}

impl<T> Clone for ThrottledSemaphore<T> {
    fn clone(&self) -> Self {
        Self {
            semaphore: self.semaphore.clone(),
            delay: self.delay,
        }
    }
}

impl ThrottledSemaphore<Token> {
    /// Create a uniform throttled semaphore over the default 1000ms interval
    ///
    /// Uniform mode serializes the pipeline through a single inner permit and
    /// spaces grants `interval / permits` apart, independent of the nominal
    /// permit count.
    ///
    /// # Panics
    ///
    /// Panics if `permits` is 0.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "throttled semaphore must have at least one permit");
        Self {
            semaphore: Semaphore::new(1),
            delay: grant_delay(DEFAULT_INTERVAL, permits),
        }
    }

    /// Start building a throttled semaphore with non-default options
    ///
    /// Defaults: 1000ms interval, uniform distribution. The semaphore options
    /// (token init, backpressure hooks, waiter capacity hint) pass through to
    /// the inner [`Semaphore`].
    #[must_use]
    pub fn builder(permits: usize) -> ThrottleBuilder<Token> {
        ThrottleBuilder {
            permits,
            interval: DEFAULT_INTERVAL,
            uniform: true,
            semaphore: Semaphore::builder(permits),
        }
    }
}

impl<T> ThrottledSemaphore<T> {
    /// Acquire a token, then hold it back for the pacing delay
    ///
    /// The delay applies after the grant and before the caller sees the
    /// token. If the delay step fails the token is released back to the
    /// inner semaphore before the error propagates, so a partial failure
    /// never leaks a permit.
    ///
    /// # Errors
    ///
    /// Propagates inner acquire failures (unreachable through the built-in
    /// operations) and pacing failures.
    pub async fn acquire(&self) -> Result<T> {
        let token = self.semaphore.acquire().await?;
        if let Err(err) = self.pace().await {
            self.semaphore.release(token);
            return Err(err);
        }
        Ok(token)
    }

    /// Release a token back to the inner semaphore
    pub fn release(&self, token: T) {
        self.semaphore.release(token);
    }

    /// The computed inter-grant delay (zero in burst mode)
    #[must_use]
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Current number of callers blocked on the inner semaphore
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.semaphore.waiting()
    }

    /// Free tokens in the inner pool
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    async fn pace(&self) -> Result<()> {
        if !self.delay.is_zero() {
            trace!(delay_ms = self.delay.as_millis() as u64, "pacing grant");
            compio::time::sleep(self.delay).await;
        }
        Ok(())
    }
}

/// Builder for a [`ThrottledSemaphore`]
pub struct ThrottleBuilder<T = Token> {
    permits: usize,
    interval: Duration,
    uniform: bool,
    semaphore: SemaphoreBuilder<T>,
}

impl<T> ThrottleBuilder<T> {
    /// Set the pacing interval (default 1000ms)
    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Choose the distribution mode (default uniform)
    ///
    /// Uniform: one inner permit, grants spaced `interval / permits` apart.
    /// Burst: all `permits` inner permits, no delay.
    #[must_use]
    pub fn uniform(mut self, uniform: bool) -> Self {
        self.uniform = uniform;
        self
    }

    /// Produce each inner token from a per-slot init closure
    ///
    /// See [`SemaphoreBuilder::token_init`]. In uniform mode the inner
    /// semaphore holds a single permit, so the closure runs once.
    #[must_use]
    pub fn token_init<U>(self, init: impl FnMut(usize) -> U + 'static) -> ThrottleBuilder<U> {
        ThrottleBuilder {
            permits: self.permits,
            interval: self.interval,
            uniform: self.uniform,
            semaphore: self.semaphore.token_init(init),
        }
    }

    /// Set the pause hook on the inner semaphore
    #[must_use]
    pub fn on_pause(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.semaphore = self.semaphore.on_pause(hook);
        self
    }

    /// Set the resume hook on the inner semaphore
    #[must_use]
    pub fn on_resume(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.semaphore = self.semaphore.on_resume(hook);
        self
    }

    /// Preallocate the inner waiter queue
    #[must_use]
    pub fn waiters_capacity(mut self, capacity: usize) -> Self {
        self.semaphore = self.semaphore.waiters_capacity(capacity);
        self
    }

    /// Build the throttled semaphore
    ///
    /// # Errors
    ///
    /// Same construction errors as [`SemaphoreBuilder::build`].
    pub fn build(self) -> Result<ThrottledSemaphore<T>> {
        if self.permits == 0 {
            return Err(PaceError::ZeroPermits);
        }
        let (inner_permits, delay) = if self.uniform {
            (1, grant_delay(self.interval, self.permits))
        } else {
            (self.permits, Duration::ZERO)
        };
        Ok(ThrottledSemaphore {
            semaphore: self.semaphore.permits(inner_permits).build()?,
            delay,
        })
    }
}

/// Spread `permits` grants evenly across `interval`
fn grant_delay(interval: Duration, permits: usize) -> Duration {
    interval / u32::try_from(permits).unwrap_or(u32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    use rstest::rstest;

    #[rstest]
    #[case(4, 1000, 250)]
    #[case(1, 1000, 1000)]
    #[case(5, 500, 100)]
    #[case(10, 1000, 100)]
    fn test_uniform_delay_is_interval_over_permits(
        #[case] permits: usize,
        #[case] interval_ms: u64,
        #[case] delay_ms: u64,
    ) {
        let throttled = ThrottledSemaphore::builder(permits)
            .interval(Duration::from_millis(interval_ms))
            .build()
            .unwrap();
        assert_eq!(throttled.delay(), Duration::from_millis(delay_ms));
        // Uniform mode always serializes through a single inner permit
        assert_eq!(throttled.available_permits(), 1);
    }

    #[test]
    fn test_default_interval_is_one_second() {
        let throttled = ThrottledSemaphore::new(4);
        assert_eq!(throttled.delay(), Duration::from_millis(250));
    }

    #[test]
    fn test_burst_mode_has_no_delay() {
        let throttled = ThrottledSemaphore::builder(3)
            .uniform(false)
            .build()
            .unwrap();
        assert!(throttled.delay().is_zero());
        assert_eq!(throttled.available_permits(), 3);
    }

    #[test]
    fn test_builder_rejects_zero_permits() {
        let result = ThrottledSemaphore::builder(0).build();
        assert_eq!(result.err(), Some(PaceError::ZeroPermits));
    }

    #[test]
    fn test_builder_rejects_unpaired_hooks() {
        let result = ThrottledSemaphore::builder(2).on_pause(|| {}).build();
        assert_eq!(result.err(), Some(PaceError::UnpairedBackpressureHooks));
    }

    #[compio::test]
    async fn test_uniform_pacing_lower_bound() {
        // 4 permits over 80ms: one grant every 20ms
        let throttled = ThrottledSemaphore::builder(4)
            .interval(Duration::from_millis(80))
            .build()
            .unwrap();
        assert_eq!(throttled.delay(), Duration::from_millis(20));

        let start = Instant::now();
        for _ in 0..5 {
            let token = throttled.acquire().await.unwrap();
            throttled.release(token);
        }
        // Five paced cycles cover at least four full delays
        assert!(
            start.elapsed() >= Duration::from_millis(80),
            "elapsed {:?} < 80ms",
            start.elapsed()
        );
    }

    #[compio::test]
    async fn test_burst_mode_admits_all_permits_immediately() {
        let throttled = ThrottledSemaphore::builder(3)
            .uniform(false)
            .build()
            .unwrap();

        let a = throttled.acquire().await.unwrap();
        let b = throttled.acquire().await.unwrap();
        let c = throttled.acquire().await.unwrap();
        assert_eq!(throttled.available_permits(), 0);
        assert_eq!(throttled.waiting(), 0);

        throttled.release(a);
        throttled.release(b);
        throttled.release(c);
        assert_eq!(throttled.available_permits(), 3);
    }

    #[compio::test]
    async fn test_wrapped_hooks_still_fire() {
        use std::future::Future;
        use std::pin::pin;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;
        use std::task::Context;

        use futures::task::noop_waker;

        let pauses = Arc::new(AtomicUsize::new(0));
        let resumes = Arc::new(AtomicUsize::new(0));
        let throttled = {
            let pauses = Arc::clone(&pauses);
            let resumes = Arc::clone(&resumes);
            ThrottledSemaphore::builder(2)
                .uniform(false)
                .on_pause(move || {
                    pauses.fetch_add(1, Ordering::SeqCst);
                })
                .on_resume(move || {
                    resumes.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .unwrap()
        };

        let a = throttled.acquire().await.unwrap();
        let b = throttled.acquire().await.unwrap();

        let waker = noop_waker();
        let mut cx = Context::from_waker(&waker);
        let mut blocked = pin!(throttled.acquire());
        assert!(blocked.as_mut().poll(&mut cx).is_pending());
        assert_eq!(pauses.load(Ordering::SeqCst), 1);
        assert_eq!(resumes.load(Ordering::SeqCst), 0);

        // First release satisfies the blocked caller; the second drains the
        // episode and fires resume.
        throttled.release(a);
        assert_eq!(resumes.load(Ordering::SeqCst), 0);
        throttled.release(b);
        assert_eq!(resumes.load(Ordering::SeqCst), 1);
    }
}
