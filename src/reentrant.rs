//! Reentrant capacity limiter: one slot per task, many units per slot.
//!
//! A [`ReentrantCapacityLimiter`] lets a task that already holds a token
//! accumulate additional logical units without consuming further capacity:
//! the first acquire takes one slot, every later acquire by the same task
//! only grows that task's held count. [`borrowed_tokens`] therefore counts
//! *distinct holding tasks*, never the sum of held units.
//!
//! Reentrant acquires never suspend on the semaphore. On the blocking
//! variants they still run the scheduling-model checkpoint first, so a
//! tight reentrant-acquire loop keeps yielding turns to other tasks.
//!
//! [`borrowed_tokens`]: ReentrantCapacityLimiter::borrowed_tokens
//!
//! # Examples
//!
//! ```
//! use capacity_limiter::ReentrantCapacityLimiter;
//!
//! let limiter = ReentrantCapacityLimiter::new(4);
//! limiter.acquire(3).unwrap();
//! limiter.acquire(2).unwrap();
//! assert_eq!(limiter.count(), 5);
//! // Both acquires consumed a single slot.
//! assert_eq!(limiter.available_tokens(), 3);
//! limiter.release(5).unwrap();
//! assert_eq!(limiter.count(), 0);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tracing::trace;

use crate::error::{LimiterError, LimiterResult};
use crate::ledger::LimiterCore;
use crate::runtime::checkpoint::blocking_checkpoint;
use crate::runtime::ident::{blocking_task_ident, TaskIdent};

/// Capacity limiter whose holders own a variable, revocable share.
///
/// Shares the slot accounting of [`CapacityLimiter`](crate::CapacityLimiter):
/// a task occupies exactly one slot no matter how many units it has
/// accumulated, and the entry disappears when its held count is released
/// back to zero.
pub struct ReentrantCapacityLimiter {
    core: LimiterCore,
}

impl ReentrantCapacityLimiter {
    /// Create a limiter with `total_tokens` slots.
    #[must_use]
    pub fn new(total_tokens: usize) -> Self {
        Self {
            core: LimiterCore::new(total_tokens),
        }
    }

    // ------------------------------------------------------------------
    // Blocking-thread family
    // ------------------------------------------------------------------

    /// Acquire `count` units, parking the calling thread if it holds
    /// nothing yet and no slot is free.
    ///
    /// If this thread already holds units, the semaphore is not contacted:
    /// a checkpoint runs, then the held count grows by `count`.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    pub fn acquire(&self, count: usize) -> LimiterResult<()> {
        let ident = Self::validated(blocking_task_ident(), count)?;
        if self.core.is_borrower(&ident) {
            blocking_checkpoint();
            self.bump(ident, count);
            return Ok(());
        }
        self.core.semaphore().acquire();
        self.core.record(ident, count);
        trace!("{} units acquired by {:?}", count, ident);
        Ok(())
    }

    /// Acquire `count` units without waiting.
    ///
    /// Reentrant calls always succeed (no checkpoint on the non-blocking
    /// path). A first acquire returns `Ok(false)` when no slot is free,
    /// leaving the ledger unchanged.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    pub fn try_acquire(&self, count: usize) -> LimiterResult<bool> {
        let ident = Self::validated(blocking_task_ident(), count)?;
        if self.core.is_borrower(&ident) {
            self.bump(ident, count);
            return Ok(true);
        }
        if self.core.semaphore().try_acquire() {
            self.core.record(ident, count);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Acquire `count` units, waiting at most `timeout` for a free slot.
    ///
    /// Reentrant calls never wait on the semaphore; they checkpoint and
    /// succeed immediately, exactly like [`acquire`](Self::acquire).
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    pub fn acquire_timeout(&self, count: usize, timeout: Duration) -> LimiterResult<bool> {
        let ident = Self::validated(blocking_task_ident(), count)?;
        if self.core.is_borrower(&ident) {
            blocking_checkpoint();
            self.bump(ident, count);
            return Ok(true);
        }
        if self.core.semaphore().acquire_timeout(timeout) {
            self.core.record(ident, count);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release `count` of this thread's units, freeing the slot when the
    /// held count reaches zero.
    ///
    /// # Errors
    ///
    /// - [`LimiterError::InvalidCount`] if `count` is zero.
    /// - [`LimiterError::NotHolding`] if this thread holds nothing.
    /// - [`LimiterError::OverRelease`] if `count` exceeds the held count;
    ///   the ledger and the semaphore are left exactly as they were.
    pub fn release(&self, count: usize) -> LimiterResult<()> {
        let ident = Self::validated(blocking_task_ident(), count)?;
        self.core.release_units(&ident, count)?;
        trace!("{} units released by {:?}", count, ident);
        Ok(())
    }

    /// Units currently held by the calling thread, zero if none.
    #[must_use]
    pub fn count(&self) -> usize {
        self.core.held_count(&blocking_task_ident())
    }

    /// Acquire `count` units and return a guard releasing them on drop.
    ///
    /// Guards nest: an inner guard on the same thread is a reentrant
    /// acquire and releases only its own units.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    pub fn guard(&self, count: usize) -> LimiterResult<ReentrantGuard<'_>> {
        self.acquire(count)?;
        Ok(ReentrantGuard {
            core: &self.core,
            ident: blocking_task_ident(),
            count,
        })
    }

    // ------------------------------------------------------------------
    // Async-task family
    // ------------------------------------------------------------------

    /// Acquire `count` units, suspending the calling task if it holds
    /// nothing yet and no slot is free.
    ///
    /// Reentrant calls yield one checkpoint instead of suspending on the
    /// semaphore. Cancel-safe on the first acquire, like
    /// [`CapacityLimiter::acquire_async`](crate::CapacityLimiter::acquire_async).
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub async fn acquire_async(&self, count: usize) -> LimiterResult<()> {
        let ident = Self::validated(crate::runtime::ident::async_task_ident(), count)?;
        if self.core.is_borrower(&ident) {
            crate::runtime::checkpoint::async_checkpoint().await;
            self.bump(ident, count);
            return Ok(());
        }
        self.core.semaphore().acquire_async().await;
        self.core.record(ident, count);
        trace!("{} units acquired by {:?}", count, ident);
        Ok(())
    }

    /// Acquire `count` units without suspending.
    ///
    /// Reentrant calls always succeed and skip the checkpoint. A first
    /// acquire returns `Ok(false)` when no slot is free.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub fn try_acquire_async(&self, count: usize) -> LimiterResult<bool> {
        let ident = Self::validated(crate::runtime::ident::async_task_ident(), count)?;
        if self.core.is_borrower(&ident) {
            self.bump(ident, count);
            return Ok(true);
        }
        if self.core.semaphore().try_acquire() {
            self.core.record(ident, count);
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Release `count` of this task's units.
    ///
    /// # Errors
    ///
    /// Same contract as [`release`](Self::release).
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub fn release_async(&self, count: usize) -> LimiterResult<()> {
        let ident = Self::validated(crate::runtime::ident::async_task_ident(), count)?;
        self.core.release_units(&ident, count)?;
        trace!("{} units released by {:?}", count, ident);
        Ok(())
    }

    /// Units currently held by the calling task, zero if none.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    #[must_use]
    pub fn count_async(&self) -> usize {
        self.core.held_count(&crate::runtime::ident::async_task_ident())
    }

    /// Acquire `count` units and return a guard releasing them on drop.
    ///
    /// # Errors
    ///
    /// [`LimiterError::InvalidCount`] if `count` is zero.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio task.
    #[cfg(feature = "tokio-runtime")]
    pub async fn guard_async(&self, count: usize) -> LimiterResult<ReentrantGuard<'_>> {
        self.acquire_async(count).await?;
        Ok(ReentrantGuard {
            core: &self.core,
            ident: crate::runtime::ident::async_task_ident(),
            count,
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

    /// Slots currently free.
    #[must_use]
    pub fn available_tokens(&self) -> usize {
        self.core.available_tokens()
    }

    /// Slots currently occupied: the number of distinct holding tasks,
    /// independent of how many units each has accumulated.
    #[must_use]
    pub fn borrowed_tokens(&self) -> usize {
        self.core.borrowed_tokens()
    }

    /// Tasks currently blocked waiting for a slot.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.core.waiting()
    }

    /// Point-in-time snapshot of the borrower ledger
    /// (task identity → held units).
    #[must_use]
    pub fn borrowers(&self) -> HashMap<TaskIdent, usize> {
        self.core.borrowers()
    }

    /// Whether any slot is currently occupied.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.core.in_use()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn validated(ident: TaskIdent, count: usize) -> LimiterResult<TaskIdent> {
        if count == 0 {
            return Err(LimiterError::InvalidCount);
        }
        Ok(ident)
    }

    fn bump(&self, ident: TaskIdent, count: usize) {
        self.core.bump(ident, count);
        trace!("reentrant acquire of {} more units by {:?}", count, ident);
    }
}

impl Default for ReentrantCapacityLimiter {
    /// A binary limiter: one slot.
    fn default() -> Self {
        Self::new(1)
    }
}

impl fmt::Debug for ReentrantCapacityLimiter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.core.fmt_limiter(f, "ReentrantCapacityLimiter")
    }
}

/// RAII guard for units from a [`ReentrantCapacityLimiter`].
///
/// Releases exactly the units it acquired when dropped. If those units were
/// already released manually the drop logs a warning instead of panicking.
#[must_use = "the units are released as soon as the guard is dropped"]
pub struct ReentrantGuard<'a> {
    core: &'a LimiterCore,
    ident: TaskIdent,
    count: usize,
}

impl Drop for ReentrantGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.core.release_units(&self.ident, self.count) {
            tracing::warn!("reentrant guard dropped with a stale ledger entry: {}", err);
        }
    }
}

impl fmt::Debug for ReentrantGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantGuard")
            .field("ident", &self.ident)
            .field("count", &self.count)
            .finish()
    }
}
