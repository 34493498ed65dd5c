//! Token-backed async semaphore with strict FIFO waiters
//!
//! The semaphore hands out *tokens* rather than RAII guards: every permit is
//! physically represented by one token created at construction, recycled
//! through acquire/release for the semaphore's whole lifetime. By default the
//! token is an interchangeable placeholder, but a custom init closure can
//! produce distinguishable values (e.g. pooled handles) that are faithfully
//! preserved across recycles.
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_pace::Semaphore;
//!
//! # async fn example() -> compio_pace::Result<()> {
//! // Create semaphore with 1024 permits
//! let semaphore = Semaphore::new(1024);
//!
//! // Acquire a token before starting work
//! let token = semaphore.acquire().await?;
//!
//! // Do work while holding the token
//! // ...
//!
//! // Hand the token back when done
//! semaphore.release(token);
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::oneshot;
use tracing::{debug, trace};

use crate::error::{PaceError, Result};

/// Placeholder token for semaphores that track capacity only
///
/// This is the canonical token value produced when no custom init closure is
/// configured. All placeholders are interchangeable; `release` normalizes any
/// supplied value to this canonical one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Token;

/// Backpressure callback invoked outside the semaphore's internal lock
type Hook = Box<dyn Fn() + Send + Sync>;

/// Produces the canonical token used to normalize releases in
/// interchangeable-token mode
type TokenFactory<T> = Box<dyn Fn() -> T + Send + Sync>;

/// A pause/resume pair signalling an upstream producer when the semaphore
/// saturates and when contention drains
struct Hooks {
    pause: Hook,
    resume: Hook,
}

/// A token-backed async semaphore for bounding concurrency
///
/// The semaphore maintains a fixed pool of tokens that must be acquired
/// before performing an operation. When the pool is empty, `acquire()` parks
/// the caller in a strict FIFO queue; each `release` hands its token directly
/// to the oldest waiter (bypassing the pool entirely) or, with no waiters,
/// returns it to the pool.
///
/// # Design
///
/// - **FIFO waiters**: blocked acquires are granted in arrival order to
///   prevent starvation
/// - **Direct hand-off**: a released token never touches the pool while a
///   waiter is queued
/// - **Backpressure hooks**: an optional pause/resume pair fires once per
///   contention episode
/// - **Cloneable**: clones share state through an `Arc`
///
/// # Example
///
/// ```rust,no_run
/// use compio_pace::Semaphore;
///
/// # async fn example() -> compio_pace::Result<()> {
/// let sem = Semaphore::new(100);
///
/// // Spawn many tasks, but only 100 run concurrently
/// for i in 0..1000 {
///     let sem = sem.clone();
///     compio::runtime::spawn(async move {
///         let token = sem.acquire().await?;
///         println!("Processing {}", i);
///         sem.release(token);
///         compio_pace::Result::Ok(())
///     })
///     .detach();
/// }
/// # Ok(())
/// # }
/// ```
pub struct Semaphore<T = Token> {
    /// Shared state between all clones of this semaphore
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Semaphore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Internal shared state for the semaphore
struct Inner<T> {
    /// Total tokens ever in circulation (the concurrency limit)
    max_permits: usize,
    /// `Some` when supplied tokens are interchangeable and `release`
    /// replaces its argument with the canonical value
    normalize: Option<TokenFactory<T>>,
    /// Optional backpressure pair, both-or-neither
    hooks: Option<Hooks>,
    /// Pool, waiter queue and pause flag behind one coarse lock
    state: Mutex<State<T>>,
}

struct State<T> {
    /// Free tokens, oldest first
    pool: VecDeque<T>,
    /// Parked acquires in arrival order; the sender side of each oneshot is
    /// the grant continuation
    waiters: VecDeque<oneshot::Sender<T>>,
    /// True while the pause hook has fired for the current contention episode
    paused: bool,
}

impl Semaphore<Token> {
    /// Create a semaphore with the given number of placeholder tokens
    ///
    /// # Panics
    ///
    /// Panics if `permits` is 0 (semaphore must have at least one permit).
    ///
    /// # Example
    ///
    /// ```rust
    /// use compio_pace::Semaphore;
    ///
    /// let sem = Semaphore::new(1024);
    /// assert_eq!(sem.available_permits(), 1024);
    /// ```
    #[must_use]
    pub fn new(permits: usize) -> Self {
        assert!(permits > 0, "semaphore must have at least one permit");
        Self {
            inner: Arc::new(Inner {
                max_permits: permits,
                normalize: Some(Box::new(|| Token)),
                hooks: None,
                state: Mutex::new(State {
                    pool: (0..permits).map(|_| Token).collect(),
                    waiters: VecDeque::new(),
                    paused: false,
                }),
            }),
        }
    }

    /// Start building a semaphore with non-default options
    ///
    /// The builder configures a custom token init closure, a backpressure
    /// hook pair and a waiter-queue capacity hint. See [`SemaphoreBuilder`].
    #[must_use]
    pub fn builder(permits: usize) -> SemaphoreBuilder<Token> {
        SemaphoreBuilder {
            permits,
            init: Box::new(|_| Token),
            normalize: Some(Box::new(|| Token)),
            on_pause: None,
            on_resume: None,
            waiters_capacity: 0,
        }
    }
}

impl<T> Semaphore<T> {
    /// Try to acquire a token without waiting
    ///
    /// Returns `Some(token)` if the pool was non-empty, or `None` if all
    /// tokens are currently in use. Never suspends, never enqueues.
    ///
    /// # Example
    ///
    /// ```rust
    /// use compio_pace::Semaphore;
    ///
    /// let sem = Semaphore::new(1);
    ///
    /// let token = sem.try_acquire();
    /// assert!(token.is_some());
    ///
    /// assert!(sem.try_acquire().is_none()); // No tokens left
    /// ```
    #[must_use]
    pub fn try_acquire(&self) -> Option<T> {
        let token = self.state().pool.pop_front();
        if token.is_some() {
            trace!("token granted from pool");
        }
        token
    }

    /// Acquire a token, waiting asynchronously if none are available
    ///
    /// Returns immediately when the pool is non-empty. Otherwise the caller
    /// is parked in FIFO order until a `release` hands it a token; if a
    /// backpressure pair is configured and this is the first blocked caller
    /// of the episode, the pause hook fires before parking.
    ///
    /// # Errors
    ///
    /// Cannot fail through the built-in operations; the
    /// [`PaceError::WaiterAbandoned`] path keeps the contract expressible.
    pub async fn acquire(&self) -> Result<T> {
        let (rx, fire_pause) = {
            let mut state = self.state();
            if let Some(token) = state.pool.pop_front() {
                trace!("token granted from pool");
                return Ok(token);
            }
            let fire_pause = self.inner.hooks.is_some() && !state.paused;
            if fire_pause {
                state.paused = true;
            }
            let (tx, rx) = oneshot::channel();
            state.waiters.push_back(tx);
            trace!(waiting = state.waiters.len(), "pool empty, caller queued");
            (rx, fire_pause)
        };

        if fire_pause {
            debug!("pool exhausted under contention, signalling pause");
            if let Some(hooks) = &self.inner.hooks {
                (hooks.pause)();
            }
        }

        match rx.await {
            Ok(token) => Ok(token),
            Err(oneshot::Canceled) => Err(PaceError::WaiterAbandoned),
        }
    }

    /// Release a token back to the semaphore
    ///
    /// If any caller is waiting, the oldest live waiter receives the token
    /// directly and it never re-enters the pool. Otherwise the token returns
    /// to the pool, ending the contention episode (the resume hook fires if
    /// one was configured and the episode had paused).
    ///
    /// In interchangeable-token mode (no custom init closure) the supplied
    /// value is normalized to the canonical token first; token identity is
    /// only meaningful with a custom init.
    pub fn release(&self, token: T) {
        let mut token = match &self.inner.normalize {
            Some(canonical) => canonical(),
            None => token,
        };

        let fire_resume = {
            let mut state = self.state();
            loop {
                match state.waiters.pop_front() {
                    Some(waiter) => match waiter.send(token) {
                        Ok(()) => {
                            trace!(
                                waiting = state.waiters.len(),
                                "token handed to oldest waiter"
                            );
                            return;
                        }
                        // Waiter abandoned before grant: take the token back
                        // and try the next one rather than losing it.
                        Err(returned) => token = returned,
                    },
                    None => {
                        let fire = state.paused;
                        state.paused = false;
                        state.pool.push_back(token);
                        trace!(available = state.pool.len(), "token returned to pool");
                        break fire;
                    }
                }
            }
        };

        if fire_resume {
            debug!("contention drained, signalling resume");
            if let Some(hooks) = &self.inner.hooks {
                (hooks.resume)();
            }
        }
    }

    /// Acquire every token, quiescing the semaphore
    ///
    /// Issues exactly `max_permits` concurrent acquires and waits for all of
    /// them, returning the tokens in call order. Once it resolves no token
    /// remains externally held, provided no other acquire races with the
    /// drain (the caller's responsibility).
    ///
    /// # Errors
    ///
    /// Fails iff a constituent acquire fails, which cannot happen through
    /// the built-in operations.
    pub async fn drain(&self) -> Result<Vec<T>> {
        let acquires = (0..self.inner.max_permits).map(|_| self.acquire());
        futures::future::try_join_all(acquires).await
    }

    /// Current number of queued waiters
    ///
    /// An instantaneous snapshot; the value may change as soon as it is read.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state().waiters.len()
    }

    /// Get the number of free tokens in the pool
    ///
    /// Useful for monitoring and debugging but not for decisions (the value
    /// may change immediately after reading).
    #[must_use]
    pub fn available_permits(&self) -> usize {
        self.state().pool.len()
    }

    /// Get the total number of permits (configured limit)
    #[must_use]
    pub fn max_permits(&self) -> usize {
        self.inner.max_permits
    }

    /// Get the number of tokens currently out of the pool (max - available)
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.max_permits - self.available_permits()
    }

    /// Lock the shared state, recovering from poisoning
    ///
    /// Internal state transitions cannot panic mid-update, so a poisoned
    /// guard still holds a consistent state.
    fn state(&self) -> MutexGuard<'_, State<T>> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Builder for a [`Semaphore`] with non-default options
///
/// Construction fails with [`PaceError::UnpairedBackpressureHooks`] when
/// exactly one of the pause/resume hooks is set, and with
/// [`PaceError::ZeroPermits`] when the permit count is 0.
///
/// # Example
///
/// ```rust
/// use compio_pace::Semaphore;
///
/// // Distinguishable tokens, e.g. indices into a handle table
/// let sem = Semaphore::builder(4).token_init(|slot| slot).build().unwrap();
/// assert_eq!(sem.try_acquire(), Some(0));
/// ```
pub struct SemaphoreBuilder<T = Token> {
    permits: usize,
    init: Box<dyn FnMut(usize) -> T>,
    normalize: Option<TokenFactory<T>>,
    on_pause: Option<Hook>,
    on_resume: Option<Hook>,
    waiters_capacity: usize,
}

impl<T> SemaphoreBuilder<T> {
    /// Produce each token from a per-slot init closure
    ///
    /// The closure runs once per permit at build time, with the slot index
    /// `0..permits`. Configuring a custom init switches the semaphore out of
    /// interchangeable-token mode: `release` then preserves the exact value
    /// it is given instead of normalizing it.
    #[must_use]
    pub fn token_init<U>(self, init: impl FnMut(usize) -> U + 'static) -> SemaphoreBuilder<U> {
        SemaphoreBuilder {
            permits: self.permits,
            init: Box::new(init),
            normalize: None,
            on_pause: self.on_pause,
            on_resume: self.on_resume,
            waiters_capacity: self.waiters_capacity,
        }
    }

    /// Set the pause hook, fired when the pool is first found empty under
    /// contention
    ///
    /// Must be paired with [`Self::on_resume`]; `build` fails otherwise.
    #[must_use]
    pub fn on_pause(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_pause = Some(Box::new(hook));
        self
    }

    /// Set the resume hook, fired when a release finds the waiter queue
    /// empty again after a pause
    ///
    /// Must be paired with [`Self::on_pause`]; `build` fails otherwise.
    #[must_use]
    pub fn on_resume(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_resume = Some(Box::new(hook));
        self
    }

    /// Preallocate the waiter queue for roughly this many parked callers
    ///
    /// A non-binding hint: exceeding it grows the queue transparently.
    #[must_use]
    pub fn waiters_capacity(mut self, capacity: usize) -> Self {
        self.waiters_capacity = capacity;
        self
    }

    /// Override the permit count (used by the throttle/rate layers, which
    /// derive the inner count from their distribution mode)
    pub(crate) fn permits(mut self, permits: usize) -> Self {
        self.permits = permits;
        self
    }

    /// Build the semaphore, creating its tokens
    ///
    /// # Errors
    ///
    /// - [`PaceError::ZeroPermits`] if the permit count is 0
    /// - [`PaceError::UnpairedBackpressureHooks`] if exactly one hook is set
    pub fn build(mut self) -> Result<Semaphore<T>> {
        if self.permits == 0 {
            return Err(PaceError::ZeroPermits);
        }
        let hooks = match (self.on_pause, self.on_resume) {
            (Some(pause), Some(resume)) => Some(Hooks { pause, resume }),
            (None, None) => None,
            _ => return Err(PaceError::UnpairedBackpressureHooks),
        };

        let mut pool = VecDeque::with_capacity(self.permits);
        for slot in 0..self.permits {
            pool.push_back((self.init)(slot));
        }

        Ok(Semaphore {
            inner: Arc::new(Inner {
                max_permits: self.permits,
                normalize: self.normalize,
                hooks,
                state: Mutex::new(State {
                    pool,
                    waiters: VecDeque::with_capacity(self.waiters_capacity),
                    paused: false,
                }),
            }),
        })
    }
}
