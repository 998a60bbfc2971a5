//! Stable per-task identity, one resolver per scheduling model.

use std::thread::{self, ThreadId};

/// Identity of a logical task, used as the borrower-ledger key.
///
/// An identity is unique for the task's lifetime, cheap to copy, and
/// hashable. Identities from the two scheduling models never collide: a
/// thread and a tokio task are distinct borrowers even while the task is
/// being polled on that very thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskIdent {
    /// A blocking OS thread, including green-thread style worker pools.
    Thread(ThreadId),
    /// A tokio task.
    #[cfg(feature = "tokio-runtime")]
    Task(tokio::task::Id),
}

/// Identity of the calling blocking thread.
#[must_use]
pub fn blocking_task_ident() -> TaskIdent {
    TaskIdent::Thread(thread::current().id())
}

/// Identity of the calling tokio task.
///
/// # Panics
///
/// Panics when called outside a running tokio task, mirroring
/// [`tokio::task::id`]. Note that a `block_on` root future is not a task;
/// spawn one to use the async limiter surface.
#[cfg(feature = "tokio-runtime")]
#[must_use]
pub fn async_task_ident() -> TaskIdent {
    TaskIdent::Task(tokio::task::id())
}
