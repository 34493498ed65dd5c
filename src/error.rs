//! Error handling and types

use thiserror::Error;

/// Errors raised by the pacing primitives
///
/// Construction errors are reported synchronously by the builders, before any
/// acquire or release takes place. `acquire` itself originates no failures in
/// the built-in design; [`PaceError::WaiterAbandoned`] exists so the
/// acquire/drain contract stays fallible for future extension.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PaceError {
    /// Semaphore or rate limiter configured with zero permits
    #[error("at least one permit is required")]
    ZeroPermits,

    /// Exactly one of the pause/resume backpressure hooks was configured
    #[error("pause and resume hooks must be configured together")]
    UnpairedBackpressureHooks,

    /// A queued acquire was abandoned before a token could be granted
    #[error("queued acquire abandoned before a token was granted")]
    WaiterAbandoned,
}

/// Result type for pacing operations
pub type Result<T> = std::result::Result<T, PaceError>;
