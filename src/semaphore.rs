//! Counting semaphore shared by blocking threads and async tasks.
//!
//! This is the slot primitive underneath [`CapacityLimiter`](crate::CapacityLimiter):
//! a fixed-capacity counting semaphore with a single FIFO wait queue that
//! holds blocked threads and suspended async tasks side by side. A release
//! from either kind of caller wakes the front waiter regardless of its kind.
//!
//! # Design
//!
//! - One `parking_lot::Mutex` guards the permit count and the wait queue.
//! - Each waiter owns a [`WaitNode`] with its own mutex, condvar, and waker
//!   slot; a blocked thread parks on the node's condvar while an async task
//!   leaves a waker behind.
//! - Releases hand the permit directly to the front waiter instead of
//!   bumping the shared count, so a late arrival can never barge past a
//!   parked waiter.
//!
//! # Examples
//!
//! ```
//! use capacity_limiter::Semaphore;
//!
//! let semaphore = Semaphore::new(2);
//! assert!(semaphore.try_acquire());
//! assert!(semaphore.try_acquire());
//! assert!(!semaphore.try_acquire());
//! semaphore.release();
//! assert_eq!(semaphore.value(), 1);
//! ```

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::trace;

/// Per-waiter parking spot, queued in arrival order.
///
/// A blocked thread waits on `condvar`; a suspended async task stores its
/// waker. `granted` flips exactly once, when a release hands the permit to
/// this waiter.
#[derive(Default)]
struct WaitNode {
    state: Mutex<NodeState>,
    condvar: Condvar,
}

#[derive(Default)]
struct NodeState {
    granted: bool,
    waker: Option<Waker>,
}

struct SemState {
    value: usize,
    waiters: VecDeque<Arc<WaitNode>>,
}

/// A FIFO-fair counting semaphore usable from blocking threads and async
/// tasks at the same time.
///
/// The capacity is fixed at construction. [`release`](Self::release) is
/// synchronous in both scheduling models and may wake a waiter of either
/// kind. Waiters are serviced strictly in arrival order; non-blocking
/// attempts via [`try_acquire`](Self::try_acquire) never enter the queue.
pub struct Semaphore {
    initial: usize,
    state: Mutex<SemState>,
}

impl Semaphore {
    /// Create a semaphore with `permits` slots available.
    #[must_use]
    pub fn new(permits: usize) -> Self {
        Self {
            initial: permits,
            state: Mutex::new(SemState {
                value: permits,
                waiters: VecDeque::new(),
            }),
        }
    }

    /// The capacity this semaphore was created with.
    #[must_use]
    pub const fn initial_value(&self) -> usize {
        self.initial
    }

    /// Number of permits currently available.
    #[must_use]
    pub fn value(&self) -> usize {
        self.state.lock().value
    }

    /// Number of callers currently parked in the wait queue.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Take a permit without waiting.
    ///
    /// Returns `false` when no permit is free. The caller is never added to
    /// the wait queue and never shows up in [`waiting`](Self::waiting).
    #[must_use]
    pub fn try_acquire(&self) -> bool {
        let mut sem = self.state.lock();
        if sem.value > 0 {
            debug_assert!(sem.waiters.is_empty(), "free permits imply an empty wait queue");
            sem.value -= 1;
            true
        } else {
            false
        }
    }

    /// Take a permit, parking the calling thread until one is handed over.
    pub fn acquire(&self) {
        let Some(node) = self.enqueue_if_exhausted() else {
            return;
        };
        let mut state = node.state.lock();
        while !state.granted {
            node.condvar.wait(&mut state);
        }
    }

    /// Take a permit, parking the calling thread for at most `timeout`.
    ///
    /// Returns `false` if the deadline passed with no permit. A waiter that
    /// is handed a permit in the same instant its deadline expires keeps the
    /// permit and returns `true`; a timed-out waiter is removed from the
    /// queue and leaves no trace.
    #[must_use]
    pub fn acquire_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let Some(node) = self.enqueue_if_exhausted() else {
            return true;
        };
        let mut state = node.state.lock();
        while !state.granted {
            if node.condvar.wait_until(&mut state, deadline).timed_out() {
                if state.granted {
                    return true;
                }
                drop(state);
                return self.abandon(&node);
            }
        }
        true
    }

    /// Take a permit asynchronously.
    ///
    /// The returned future is cancel-safe: dropping it before completion
    /// removes the waiter from the queue, and a permit handed over in the
    /// same instant is passed on to the next waiter rather than lost.
    pub fn acquire_async(&self) -> Acquire<'_> {
        Acquire {
            semaphore: self,
            node: None,
            acquired: false,
        }
    }

    /// Return one permit.
    ///
    /// If anyone is parked in the queue the permit is handed directly to the
    /// front waiter; otherwise the available count grows. Releasing more
    /// permits than were acquired is a contract violation and trips an
    /// assertion in debug builds.
    pub fn release(&self) {
        let waker = {
            let mut sem = self.state.lock();
            if let Some(node) = sem.waiters.pop_front() {
                trace!("permit handed to front waiter ({} still waiting)", sem.waiters.len());
                Self::grant(&node)
            } else {
                debug_assert!(sem.value < self.initial, "semaphore released above its capacity");
                sem.value += 1;
                None
            }
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Take a free permit, or join the back of the wait queue.
    ///
    /// Returns `None` when a permit was taken on the spot.
    fn enqueue_if_exhausted(&self) -> Option<Arc<WaitNode>> {
        let mut sem = self.state.lock();
        if sem.value > 0 {
            debug_assert!(sem.waiters.is_empty(), "free permits imply an empty wait queue");
            sem.value -= 1;
            return None;
        }
        let node = Arc::new(WaitNode::default());
        sem.waiters.push_back(Arc::clone(&node));
        trace!("waiter parked ({} waiting)", sem.waiters.len());
        Some(node)
    }

    /// Mark a waiter as granted and collect its waker, if any.
    ///
    /// Called with the semaphore lock held, so a cancelling waiter that
    /// re-checks the queue always observes either "still queued" or
    /// "granted", never an in-between state.
    fn grant(node: &WaitNode) -> Option<Waker> {
        let mut state = node.state.lock();
        state.granted = true;
        node.condvar.notify_one();
        state.waker.take()
    }

    /// Remove a waiter that gave up (timeout or cancellation).
    ///
    /// Returns `true` when the waiter was already granted a permit — it is
    /// gone from the queue, so the caller now owns that permit and must
    /// either keep it or pass it on.
    fn abandon(&self, node: &Arc<WaitNode>) -> bool {
        let mut sem = self.state.lock();
        if let Some(pos) = sem.waiters.iter().position(|queued| Arc::ptr_eq(queued, node)) {
            sem.waiters.remove(pos);
            false
        } else {
            true
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sem = self.state.lock();
        f.debug_struct("Semaphore")
            .field("initial_value", &self.initial)
            .field("value", &sem.value)
            .field("waiting", &sem.waiters.len())
            .finish()
    }
}

/// Future returned by [`Semaphore::acquire_async`].
///
/// Resolves once a permit is taken. Dropping an unresolved `Acquire` leaves
/// the semaphore exactly as if the attempt never happened.
#[must_use = "futures do nothing unless you `.await` or poll them"]
pub struct Acquire<'a> {
    semaphore: &'a Semaphore,
    node: Option<Arc<WaitNode>>,
    acquired: bool,
}

impl Future for Acquire<'_> {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.acquired {
            return Poll::Ready(());
        }
        if let Some(node) = &this.node {
            let mut state = node.state.lock();
            if state.granted {
                this.acquired = true;
                return Poll::Ready(());
            }
            state.waker = Some(cx.waker().clone());
            return Poll::Pending;
        }
        let mut sem = this.semaphore.state.lock();
        if sem.value > 0 {
            debug_assert!(sem.waiters.is_empty(), "free permits imply an empty wait queue");
            sem.value -= 1;
            this.acquired = true;
            return Poll::Ready(());
        }
        let node = Arc::new(WaitNode::default());
        node.state.lock().waker = Some(cx.waker().clone());
        sem.waiters.push_back(Arc::clone(&node));
        trace!("async waiter parked ({} waiting)", sem.waiters.len());
        drop(sem);
        this.node = Some(node);
        Poll::Pending
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if self.acquired {
            return;
        }
        if let Some(node) = self.node.take() {
            if self.semaphore.abandon(&node) {
                // The permit landed on this waiter while it was being
                // cancelled; pass it on so no capacity is lost.
                trace!("cancelled waiter forwarding its permit");
                self.semaphore.release();
            }
        }
    }
}

impl fmt::Debug for Acquire<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("acquired", &self.acquired)
            .field("queued", &self.node.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    fn wait_for_waiting(semaphore: &Semaphore, expected: usize) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while semaphore.waiting() != expected {
            assert!(Instant::now() < deadline, "waiter count never reached {expected}");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_try_acquire_counts_down() {
        let semaphore = Semaphore::new(2);
        assert_eq!(semaphore.initial_value(), 2);
        assert!(semaphore.try_acquire());
        assert!(semaphore.try_acquire());
        assert!(!semaphore.try_acquire());
        assert_eq!(semaphore.value(), 0);
        assert_eq!(semaphore.waiting(), 0);

        semaphore.release();
        assert_eq!(semaphore.value(), 1);
        assert!(semaphore.try_acquire());
    }

    #[test]
    fn test_blocking_acquire_waits_for_release() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.acquire();

        let contender = Arc::clone(&semaphore);
        let (acquired_tx, acquired_rx) = mpsc::channel();
        let handle = thread::spawn(move || {
            contender.acquire();
            acquired_tx.send(()).unwrap();
            contender.release();
        });

        wait_for_waiting(&semaphore, 1);
        assert!(acquired_rx.try_recv().is_err());

        semaphore.release();
        acquired_rx.recv().unwrap();
        handle.join().unwrap();
        assert_eq!(semaphore.value(), 1);
    }

    #[test]
    fn test_acquire_timeout_expires_cleanly() {
        let semaphore = Semaphore::new(0);
        assert!(!semaphore.acquire_timeout(Duration::from_millis(50)));
        // The timed-out waiter must leave no trace in the queue.
        assert_eq!(semaphore.waiting(), 0);
        assert_eq!(semaphore.value(), 0);
    }

    #[test]
    fn test_acquire_timeout_succeeds_when_released() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.acquire();

        let contender = Arc::clone(&semaphore);
        let handle =
            thread::spawn(move || contender.acquire_timeout(Duration::from_secs(5)));

        wait_for_waiting(&semaphore, 1);
        semaphore.release();
        assert!(handle.join().unwrap());
        assert_eq!(semaphore.value(), 0);
    }

    #[test]
    fn test_blocking_waiters_wake_in_fifo_order() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.acquire();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for index in 0..3 {
            let contender = Arc::clone(&semaphore);
            let order = Arc::clone(&order);
            handles.push(thread::spawn(move || {
                contender.acquire();
                order.lock().push(index);
                contender.release();
            }));
            // Serialize queue entry so arrival order is deterministic.
            wait_for_waiting(&semaphore, index + 1);
        }

        semaphore.release();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(semaphore.value(), 1);
    }

    #[tokio::test]
    async fn test_async_acquire_uncontended() {
        let semaphore = Semaphore::new(1);
        semaphore.acquire_async().await;
        assert_eq!(semaphore.value(), 0);
        semaphore.release();
        assert_eq!(semaphore.value(), 1);
    }

    #[tokio::test]
    async fn test_async_acquire_waits_for_release() {
        let semaphore = Arc::new(Semaphore::new(1));
        semaphore.acquire_async().await;

        let contender = Arc::clone(&semaphore);
        let handle = tokio::spawn(async move {
            contender.acquire_async().await;
            contender.release();
        });

        while semaphore.waiting() != 1 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        semaphore.release();
        handle.await.unwrap();
        assert_eq!(semaphore.value(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_async_waiter_leaves_queue() {
        let semaphore = Semaphore::new(0);
        let result =
            tokio::time::timeout(Duration::from_millis(50), semaphore.acquire_async()).await;
        assert!(result.is_err());
        assert_eq!(semaphore.waiting(), 0);
        assert_eq!(semaphore.value(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_waiter_forwards_granted_permit() {
        let semaphore = Semaphore::new(1);
        semaphore.acquire_async().await;

        let mut pending = Box::pin(semaphore.acquire_async());
        assert!(futures::poll!(pending.as_mut()).is_pending());
        assert_eq!(semaphore.waiting(), 1);

        // Hand the permit to the pending waiter, then cancel it before it
        // ever polls again: the permit must come back.
        semaphore.release();
        drop(pending);
        assert_eq!(semaphore.value(), 1);
        assert_eq!(semaphore.waiting(), 0);
    }
}
