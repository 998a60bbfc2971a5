//! Capacity limiter: at most N tasks hold a token at a time.
//!
//! A [`CapacityLimiter`] bounds how many logical tasks may concurrently
//! hold one of its tokens. It keeps an exact ledger of who holds a token,
//! delegates the actual waiting to the crate's dual-mode
//! [`Semaphore`](crate::Semaphore), and rejects misuse (double acquire,
//! release without hold) with a [`LimiterError`] before touching any state.
//!
//! Two operation families share identical semantics: the plain-named
//! methods serve blocking threads, the `_async`-suffixed methods serve
//! tokio tasks. A single limiter may be used by both kinds at once; waiters
//! of both kinds share one FIFO queue.
//!
//! # Examples
//!
//! ```
//! use capacity_limiter::CapacityLimiter;
//!
//! let limiter = CapacityLimiter::new(2);
//! assert!(limiter.try_acquire().unwrap());
//! assert_eq!(limiter.available_tokens(), 1);
//! assert!(limiter.borrowed());
//! limiter.release().unwrap();
//! assert!(!limiter.in_use());
//! ```
//!
//! Scoped acquisition releases on every exit path:
//!
//! ```
//! use capacity_limiter::CapacityLimiter;
//!
//! let limiter = CapacityLimiter::new(1);
//! {
//!     let _guard = limiter.guard().unwrap();
//!     assert_eq!(limiter.available_tokens(), 0);
//! }
//! assert_eq!(limiter.available_tokens(), 1);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::error::LimiterResult;
use crate::ledger::LimiterCore;
use crate::runtime::ident::{blocking_task_ident, TaskIdent};

/// Bounds the number of tasks concurrently holding a resource token.
///
/// Each holder occupies exactly one token; a task that already holds one
/// cannot acquire another (see
/// [`ReentrantCapacityLimiter`](crate::ReentrantCapacityLimiter) for
/// variable-sized shares). Waiters are serviced in arrival order across
/// both scheduling models.
pub struct CapacityLimiter {
    core: LimiterCore,
}

impl CapacityLimiter {
    /// Create a limiter with `total_tokens` tokens.
    ///
    /// A capacity of zero is allowed: such a limiter never grants a token,
    /// non-blocking acquires return `false`, and blocking acquires wait
    /// until they are cancelled or time out.
    #[must_use]
    pub fn new(total_tokens: usize) -> Self {
        Self {
            core: LimiterCore::new(total_tokens),
        }
    }

    // ------------------------------------------------------------------
    // Blocking-thread family
    // ------------------------------------------------------------------

    /// Acquire a token, parking the calling thread until one is free.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this thread already holds a token; the ledger is unchanged.
    pub fn acquire(&self) -> LimiterResult<()> {
        let ident = blocking_task_ident();
        self.core.ensure_not_borrowing(&ident)?;
        self.core.semaphore().acquire();
        self.core.record(ident, 1);
        trace!("token acquired by {:?}", ident);
        Ok(())
    }

    /// Acquire a token without waiting.
    ///
    /// Returns `Ok(false)` when no token is free; the attempt never joins
    /// the wait queue and the ledger is unchanged.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this thread already holds a token.
    pub fn try_acquire(&self) -> LimiterResult<bool> {
        let ident = blocking_task_ident();
        self.core.ensure_not_borrowing(&ident)?;
        if self.core.semaphore().try_acquire() {
            self.core.record(ident, 1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquire a token, waiting at most `timeout`.
    ///
    /// Returns `Ok(false)` when the deadline passes first; the expired
    /// waiter is removed from the queue and the ledger is unchanged.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this thread already holds a token.
    pub fn acquire_timeout(&self, timeout: Duration) -> LimiterResult<bool> {
        let ident = blocking_task_ident();
        self.core.ensure_not_borrowing(&ident)?;
        if self.core.semaphore().acquire_timeout(timeout) {
            self.core.record(ident, 1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release this thread's token.
    ///
    /// # Errors
    ///
    /// [`LimiterError::NotHolding`](crate::LimiterError::NotHolding) if this
    /// thread holds no token; nothing is mutated.
    pub fn release(&self) -> LimiterResult<()> {
        let ident = blocking_task_ident();
        self.core.release_entry(&ident)?;
        trace!("token released by {:?}", ident);
        Ok(())
    }

    /// Whether the calling thread currently holds a token.
    #[must_use]
    pub fn borrowed(&self) -> bool {
        self.core.is_borrower(&blocking_task_ident())
    }

    /// Acquire a token and return a guard that releases it on drop.
    ///
    /// The release runs on every exit path from the guarded scope,
    /// including unwinding from a panic.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this thread already holds a token.
    pub fn guard(&self) -> LimiterResult<CapacityGuard<'_>> {
        self.acquire()?;
        Ok(CapacityGuard {
            core: &self.core,
            ident: blocking_task_ident(),
        })
    }

    // ------------------------------------------------------------------
    // Async-task family
    // ------------------------------------------------------------------

    /// Acquire a token, suspending the calling task until one is free.
    ///
    /// Cancel-safe: dropping the future mid-wait removes the waiter and
    /// leaves the ledger untouched — the outcome is always "acquired and
    /// recorded" or "nothing happened".
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this task already holds a token.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task, as
    /// [`async_task_ident`](crate::runtime::ident::async_task_ident) does.
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(&self) -> LimiterResult<()> {
        let ident = crate::runtime::ident::async_task_ident();
        self.core.ensure_not_borrowing(&ident)?;
        self.core.semaphore().acquire_async().await;
        self.core.record(ident, 1);
        trace!("token acquired by {:?}", ident);
        Ok(())
    }

    /// Acquire a token without suspending.
    ///
    /// Returns `Ok(false)` when no token is free; the attempt never joins
    /// the wait queue and the ledger is unchanged.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this task already holds a token.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub fn try_acquire_async(&self) -> LimiterResult<bool> {
        let ident = crate::runtime::ident::async_task_ident();
        self.core.ensure_not_borrowing(&ident)?;
        if self.core.semaphore().try_acquire() {
            self.core.record(ident, 1);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release this task's token.
    ///
    /// # Errors
    ///
    /// [`LimiterError::NotHolding`](crate::LimiterError::NotHolding) if this
    /// task holds no token; nothing is mutated.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub fn release_async(&self) -> LimiterResult<()> {
        let ident = crate::runtime::ident::async_task_ident();
        self.core.release_entry(&ident)?;
        trace!("token released by {:?}", ident);
        Ok(())
    }

    /// Whether the calling task currently holds a token.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    #[must_use]
    pub fn borrowed_async(&self) -> bool {
        self.core.is_borrower(&crate::runtime::ident::async_task_ident())
    }

    /// Acquire a token and return a guard that releases it on drop.
    ///
    /// # Errors
    ///
    /// [`LimiterError::AlreadyHolding`](crate::LimiterError::AlreadyHolding)
    /// if this task already holds a token.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub async fn guard_async(&self) -> LimiterResult<CapacityGuard<'_>> {
        self.acquire_async().await?;
        Ok(CapacityGuard {
            core: &self.core,
            ident: crate::runtime::ident::async_task_ident(),
        })
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Capacity this limiter was created with.
    #[must_use]
    pub const fn total_tokens(&self) -> usize {
        self.core.total_tokens()
    }

    /// Tokens currently free.
    #[must_use]
    pub fn available_tokens(&self) -> usize {
        self.core.available_tokens()
    }

    /// Tokens currently held, i.e. the number of distinct holding tasks.
    #[must_use]
    pub fn borrowed_tokens(&self) -> usize {
        self.core.borrowed_tokens()
    }

    /// Tasks currently blocked waiting for a token.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.core.waiting()
    }

    /// Point-in-time snapshot of the borrower ledger.
    ///
    /// The returned map is a copy; mutating it has no effect on the
    /// limiter.
    #[must_use]
    pub fn borrowers(&self) -> HashMap<TaskIdent, usize> {
        self.core.borrowers()
    }

    /// Whether any token is currently borrowed.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.core.in_use()
    }
}

impl Default for CapacityLimiter {
    /// A binary limiter: one token.
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for CapacityLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_limiter(f, "CapacityLimiter")
    }
}

/// RAII guard for a token from a [`CapacityLimiter`].
///
/// Releases the token of the task that created it when dropped, no matter
/// how the guarded scope exits. If the token was already released manually
/// the drop logs a warning instead of panicking.
#[must_use = "the token is released as soon as the guard is dropped"]
pub struct CapacityGuard<'a> {
    pub(crate) core: &'a LimiterCore,
    pub(crate) ident: TaskIdent,
}

impl Drop for CapacityGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.core.release_entry(&self.ident) {
            tracing::warn!("capacity guard dropped without a live ledger entry: {}", err);
        }
    }
}

impl fmt::Debug for CapacityGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapacityGuard").field("ident", &self.ident).finish()
    }
}
