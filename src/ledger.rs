//! Borrower ledger shared by both limiter flavors.
//!
//! The ledger pairs the slot semaphore with a map from task identity to
//! held-unit count and keeps the two consistent: a task appears in the map
//! exactly while it occupies one semaphore slot. All validation,
//! introspection, and representation logic lives here; the public limiter
//! types only add the model-specific resolve/suspend/checkpoint glue.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use crate::error::{LimiterError, LimiterResult};
use crate::runtime::ident::TaskIdent;
use crate::semaphore::Semaphore;

/// Slot semaphore plus borrower ledger.
///
/// Mutation discipline: an entry is only created, bumped, or removed by the
/// task it belongs to (or by a guard that captured that task's identity at
/// acquire time). The map lock therefore only ever serializes *different*
/// tasks touching *different* entries. The ledger is written strictly after
/// the semaphore confirms an acquisition, so a cancelled or timed-out wait
/// can never leave a phantom entry behind.
pub(crate) struct LimiterCore {
    semaphore: Semaphore,
    borrowers: Mutex<HashMap<TaskIdent, usize>>,
}

impl LimiterCore {
    pub(crate) fn new(total_tokens: usize) -> Self {
        Self {
            semaphore: Semaphore::new(total_tokens),
            borrowers: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) const fn semaphore(&self) -> &Semaphore {
        &self.semaphore
    }

    pub(crate) const fn total_tokens(&self) -> usize {
        self.semaphore.initial_value()
    }

    pub(crate) fn available_tokens(&self) -> usize {
        self.semaphore.value()
    }

    pub(crate) fn borrowed_tokens(&self) -> usize {
        self.semaphore.initial_value() - self.semaphore.value()
    }

    pub(crate) fn waiting(&self) -> usize {
        self.semaphore.waiting()
    }

    pub(crate) fn in_use(&self) -> bool {
        self.semaphore.initial_value() > self.semaphore.value()
    }

    /// Point-in-time copy of the ledger.
    pub(crate) fn borrowers(&self) -> HashMap<TaskIdent, usize> {
        self.borrowers.lock().clone()
    }

    pub(crate) fn is_borrower(&self, ident: &TaskIdent) -> bool {
        self.borrowers.lock().contains_key(ident)
    }

    pub(crate) fn held_count(&self, ident: &TaskIdent) -> usize {
        self.borrowers.lock().get(ident).copied().unwrap_or(0)
    }

    /// Fail with [`LimiterError::AlreadyHolding`] if `ident` is in the
    /// ledger. Called before the semaphore is contacted, so a rejected
    /// acquire mutates nothing.
    pub(crate) fn ensure_not_borrowing(&self, ident: &TaskIdent) -> LimiterResult<()> {
        if self.borrowers.lock().contains_key(ident) {
            Err(LimiterError::AlreadyHolding)
        } else {
            Ok(())
        }
    }

    /// Record a fresh acquisition of `count` units.
    pub(crate) fn record(&self, ident: TaskIdent, count: usize) {
        let mut borrowers = self.borrowers.lock();
        debug_assert!(
            !borrowers.contains_key(&ident),
            "borrower ledger already has an entry for this task"
        );
        borrowers.insert(ident, count);
    }

    /// Add `count` units to an existing entry.
    ///
    /// The entry cannot vanish between the caller's borrower check and this
    /// call: only the owning task removes its own entry, and that task is
    /// busy executing the reentrant acquire.
    pub(crate) fn bump(&self, ident: TaskIdent, count: usize) {
        *self.borrowers.lock().entry(ident).or_default() += count;
    }

    /// Drop `ident`'s entry outright and free its slot.
    ///
    /// Non-reentrant release: the held count is always 1.
    pub(crate) fn release_entry(&self, ident: &TaskIdent) -> LimiterResult<()> {
        {
            let mut borrowers = self.borrowers.lock();
            if borrowers.remove(ident).is_none() {
                return Err(LimiterError::NotHolding);
            }
        }
        self.semaphore.release();
        Ok(())
    }

    /// Subtract `count` units from `ident`'s entry, freeing the slot when
    /// the count reaches zero.
    ///
    /// Over-release leaves both the ledger and the semaphore untouched.
    pub(crate) fn release_units(&self, ident: &TaskIdent, count: usize) -> LimiterResult<()> {
        let slot_freed = {
            let mut borrowers = self.borrowers.lock();
            let Some(held) = borrowers.get_mut(ident) else {
                return Err(LimiterError::NotHolding);
            };
            if *held > count {
                *held -= count;
                false
            } else if *held == count {
                borrowers.remove(ident);
                true
            } else {
                return Err(LimiterError::OverRelease);
            }
        };
        if slot_freed {
            self.semaphore.release();
        }
        Ok(())
    }

    /// Shared `Debug` rendering: type name, address, available count, and
    /// the waiter count once every token is out.
    pub(crate) fn fmt_limiter(&self, f: &mut fmt::Formatter<'_>, name: &str) -> fmt::Result {
        let available = self.semaphore.value();
        write!(
            f,
            "{name}({}) at {self:p} [available_tokens={available}",
            self.semaphore.initial_value(),
        )?;
        if available == 0 {
            write!(f, ", waiting={}", self.semaphore.waiting())?;
        }
        write!(f, "]")
    }
}
