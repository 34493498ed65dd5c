//! Async concurrency limiting and rate pacing primitives for compio runtime
//!
//! This crate provides in-process primitives for bounding and pacing
//! concurrent work on the [compio](https://github.com/compio-rs/compio)
//! async runtime.
//!
//! # Primitives
//!
//! - [`Semaphore`] - token-backed counting semaphore with strict FIFO
//!   waiters and optional backpressure hooks
//! - [`ThrottledSemaphore`] - semaphore whose grants are paced to a target
//!   rate, uniformly or in bursts
//! - [`RateLimiter`] - self-releasing admission gate bounding requests per
//!   time unit
//!
//! # Example
//!
//! ```rust,no_run
//! use compio_pace::Semaphore;
//!
//! #[compio::main]
//! async fn main() -> compio_pace::Result<()> {
//!     let sem = Semaphore::new(100);
//!
//!     // Spawn many tasks, but only 100 run concurrently
//!     for i in 0..1000 {
//!         let sem = sem.clone();
//!         compio::runtime::spawn(async move {
//!             let token = sem.acquire().await?;
//!             println!("Task {}", i);
//!             sem.release(token);
//!             compio_pace::Result::Ok(())
//!         })
//!         .detach();
//!     }
//!     Ok(())
//! }
//! ```

mod error;
mod rate;
mod semaphore;
mod throttle;

pub use error::{PaceError, Result};
pub use rate::{RateLimiter, RateLimiterBuilder};
pub use semaphore::{Semaphore, SemaphoreBuilder, Token};
pub use throttle::{ThrottleBuilder, ThrottledSemaphore};
