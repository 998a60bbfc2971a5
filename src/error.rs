//! Error types for limiter operations.

use thiserror::Error;

/// Errors produced by misusing a capacity limiter.
///
/// Every variant is raised synchronously at the call site, before any
/// ledger or semaphore state is mutated. None of them is retried or
/// recovered internally; callers should treat them as programming errors.
/// A non-blocking or timed-out acquire attempt is *not* an error — it is
/// reported as `Ok(false)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LimiterError {
    /// A reentrant operation was asked for zero units.
    #[error("count must be >= 1")]
    InvalidCount,
    /// Non-reentrant acquire by a task that already holds a token.
    #[error("the current task is already holding one of this capacity limiter's tokens")]
    AlreadyHolding,
    /// Release by a task that holds no token.
    #[error("the current task is not holding any of this capacity limiter's tokens")]
    NotHolding,
    /// Reentrant release of more units than the task holds.
    #[error("capacity limiter released too many times")]
    OverRelease,
}

/// Result alias used across the limiter surface.
pub type LimiterResult<T> = Result<T, LimiterError>;
