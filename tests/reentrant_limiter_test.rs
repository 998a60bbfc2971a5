//! Integration tests for `ReentrantCapacityLimiter`
//!
//! These tests validate:
//! - Unit accumulation on a single slot, across both scheduling models
//! - Slot-occupancy accounting (`borrowed_tokens` counts tasks, not units)
//! - Partial release, over-release, and validation errors
//! - Net-zero acquire/release sequences restoring all state
//! - Reentrant fast paths never waiting on the semaphore

use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use capacity_limiter::util::telemetry::init_tracing;
use capacity_limiter::{LimiterError, ReentrantCapacityLimiter};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn assert_accounting(limiter: &ReentrantCapacityLimiter) {
    assert_eq!(
        limiter.available_tokens() + limiter.borrowed_tokens(),
        limiter.total_tokens()
    );
    assert_eq!(limiter.borrowed_tokens(), limiter.borrowers().len());
}

/// Spawn a thread that holds `count` units until told to let go.
fn spawn_holder(
    limiter: &Arc<ReentrantCapacityLimiter>,
    count: usize,
) -> (thread::JoinHandle<()>, mpsc::Sender<()>) {
    let limiter = Arc::clone(limiter);
    let (release_tx, release_rx) = mpsc::channel();
    let (acquired_tx, acquired_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        limiter.acquire(count).unwrap();
        acquired_tx.send(()).unwrap();
        release_rx.recv().unwrap();
        limiter.release(count).unwrap();
    });
    acquired_rx
        .recv_timeout(Duration::from_secs(5))
        .expect("holder thread failed to acquire");
    (handle, release_tx)
}

fn wait_for_waiting(limiter: &ReentrantCapacityLimiter, expected: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while limiter.waiting() != expected {
        assert!(
            Instant::now() < deadline,
            "waiter count never reached {expected}"
        );
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// BLOCKING-THREAD FAMILY
// ============================================================================

#[test]
fn test_units_accumulate_on_one_slot() {
    init_tracing();
    let limiter = ReentrantCapacityLimiter::new(4);

    limiter.acquire(3).unwrap();
    assert_eq!(limiter.available_tokens(), 3);
    assert_accounting(&limiter);

    limiter.acquire(2).unwrap();
    assert_eq!(limiter.count(), 5);
    assert_eq!(limiter.available_tokens(), 3);
    assert_eq!(limiter.borrowed_tokens(), 1);
    assert_accounting(&limiter);

    limiter.release(5).unwrap();
    assert_eq!(limiter.count(), 0);
    assert!(limiter.borrowers().is_empty());
    assert_eq!(limiter.available_tokens(), 4);
}

#[test]
fn test_borrowed_tokens_counts_tasks_not_units() {
    let limiter = Arc::new(ReentrantCapacityLimiter::new(2));

    let (a, release_a) = spawn_holder(&limiter, 10);
    let (b, release_b) = spawn_holder(&limiter, 1);

    // Eleven units out, but only two slots occupied.
    assert_eq!(limiter.borrowed_tokens(), 2);
    assert_eq!(limiter.available_tokens(), 0);
    assert_eq!(limiter.borrowers().values().sum::<usize>(), 11);
    assert_accounting(&limiter);

    assert!(!limiter.try_acquire(1).unwrap());
    assert_eq!(limiter.waiting(), 0);

    release_a.send(()).unwrap();
    a.join().unwrap();
    assert_eq!(limiter.available_tokens(), 1);

    assert!(limiter.try_acquire(1).unwrap());
    limiter.release(1).unwrap();

    release_b.send(()).unwrap();
    b.join().unwrap();
    assert_eq!(limiter.available_tokens(), 2);
    assert_accounting(&limiter);
}

#[test]
fn test_partial_release_keeps_the_slot() {
    let limiter = Arc::new(ReentrantCapacityLimiter::new(1));
    let holder = Arc::clone(&limiter);
    let (partial_tx, partial_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel::<()>();
    let handle = thread::spawn(move || {
        holder.acquire(3).unwrap();
        partial_tx.send(()).unwrap();
        done_rx.recv().unwrap();
        holder.release(2).unwrap();
        // Two of three units gone: the slot is still ours.
        assert_eq!(holder.count(), 1);
        assert_eq!(holder.available_tokens(), 0);
        holder.release(1).unwrap();
    });
    partial_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let waiter_limiter = Arc::clone(&limiter);
    let waiter = thread::spawn(move || {
        waiter_limiter.acquire(1).unwrap();
        waiter_limiter.release(1).unwrap();
    });
    wait_for_waiting(&limiter, 1);

    // Only the final release may wake the waiter.
    done_tx.send(()).unwrap();
    handle.join().unwrap();
    waiter.join().unwrap();
    assert_eq!(limiter.available_tokens(), 1);
    assert_accounting(&limiter);
}

#[test]
fn test_error_cases_leave_state_untouched() {
    let limiter = ReentrantCapacityLimiter::new(1);

    assert_eq!(limiter.release(1), Err(LimiterError::NotHolding));
    assert_eq!(limiter.acquire(0), Err(LimiterError::InvalidCount));
    assert_eq!(limiter.release(0), Err(LimiterError::InvalidCount));

    limiter.acquire(2).unwrap();
    assert_eq!(limiter.release(5), Err(LimiterError::OverRelease));
    assert_eq!(limiter.count(), 2);
    assert_eq!(limiter.available_tokens(), 0);
    assert_accounting(&limiter);

    limiter.release(2).unwrap();
    assert_eq!(limiter.available_tokens(), 1);
}

#[test]
fn test_net_zero_sequences_restore_state() {
    let limiter = ReentrantCapacityLimiter::new(3);
    let sequences: &[&[i64]] = &[
        &[3, -3],
        &[3, 2, -5],
        &[1, 1, 1, -2, 4, -5],
        &[10, -4, -5, 2, -3],
    ];

    for sequence in sequences {
        let before = limiter.available_tokens();
        for &step in *sequence {
            if step > 0 {
                limiter.acquire(usize::try_from(step).unwrap()).unwrap();
            } else {
                limiter.release(usize::try_from(-step).unwrap()).unwrap();
            }
            assert_accounting(&limiter);
        }
        assert_eq!(limiter.count(), 0);
        assert!(limiter.borrowers().is_empty());
        assert_eq!(limiter.available_tokens(), before);
    }
}

#[test]
fn test_zero_capacity_reentrant_limiter() {
    let limiter = ReentrantCapacityLimiter::new(0);
    assert!(!limiter.try_acquire(1).unwrap());
    assert!(!limiter.acquire_timeout(1, Duration::from_millis(50)).unwrap());
    assert_eq!(limiter.waiting(), 0);
    assert_eq!(limiter.count(), 0);
    assert_accounting(&limiter);
}

// ============================================================================
// ASYNC-TASK FAMILY
// ============================================================================

#[tokio::test]
async fn test_async_units_accumulate_on_one_slot() {
    init_tracing();
    let limiter = Arc::new(ReentrantCapacityLimiter::new(4));
    let remote = Arc::clone(&limiter);
    tokio::spawn(async move {
        remote.acquire_async(3).await.unwrap();
        let available = remote.available_tokens();

        remote.acquire_async(2).await.unwrap();
        assert_eq!(remote.count_async(), 5);
        assert_eq!(remote.available_tokens(), available);
        assert_eq!(remote.borrowed_tokens(), 1);

        remote.release_async(5).unwrap();
        assert_eq!(remote.count_async(), 0);
    })
    .await
    .unwrap();
    assert_eq!(limiter.available_tokens(), 4);
    assert_accounting(&limiter);
}

#[tokio::test]
async fn test_async_error_cases() {
    let limiter = Arc::new(ReentrantCapacityLimiter::new(1));
    let remote = Arc::clone(&limiter);
    tokio::spawn(async move {
        assert_eq!(remote.release_async(1), Err(LimiterError::NotHolding));
        assert_eq!(remote.acquire_async(0).await, Err(LimiterError::InvalidCount));
        assert_eq!(remote.try_acquire_async(0), Err(LimiterError::InvalidCount));

        remote.acquire_async(2).await.unwrap();
        assert_eq!(remote.release_async(3), Err(LimiterError::OverRelease));
        assert_eq!(remote.count_async(), 2);
        remote.release_async(2).unwrap();
    })
    .await
    .unwrap();
    assert_eq!(limiter.available_tokens(), 1);
}

#[tokio::test]
async fn test_reentrant_fast_path_never_waits() {
    // With the only slot held by this task, reentrant acquires must keep
    // succeeding immediately even though the semaphore is exhausted.
    let limiter = Arc::new(ReentrantCapacityLimiter::new(1));
    let remote = Arc::clone(&limiter);
    tokio::spawn(async move {
        remote.acquire_async(1).await.unwrap();
        for _ in 0..100 {
            remote.acquire_async(1).await.unwrap();
        }
        assert_eq!(remote.count_async(), 101);
        assert_eq!(remote.available_tokens(), 0);
        remote.release_async(101).unwrap();
    })
    .await
    .unwrap();
    assert_eq!(limiter.available_tokens(), 1);
}

#[tokio::test]
async fn test_async_nested_guards() {
    let limiter = Arc::new(ReentrantCapacityLimiter::new(1));
    let remote = Arc::clone(&limiter);
    tokio::spawn(async move {
        let outer = remote.guard_async(2).await.unwrap();
        assert_eq!(remote.count_async(), 2);
        {
            let _inner = remote.guard_async(3).await.unwrap();
            assert_eq!(remote.count_async(), 5);
        }
        assert_eq!(remote.count_async(), 2);
        drop(outer);
        assert_eq!(remote.count_async(), 0);
    })
    .await
    .unwrap();
    assert_eq!(limiter.available_tokens(), 1);
    assert!(limiter.borrowers().is_empty());
}

// ============================================================================
// MIXED SCHEDULING MODELS
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_thread_and_task_shares_are_independent() {
    let limiter = Arc::new(ReentrantCapacityLimiter::new(2));

    let (thread_holder, thread_release) = spawn_holder(&limiter, 5);

    let task_limiter = Arc::clone(&limiter);
    let (task_release_tx, task_release_rx) = tokio::sync::oneshot::channel();
    let (task_ready_tx, task_ready_rx) = tokio::sync::oneshot::channel();
    let task_holder = tokio::spawn(async move {
        task_limiter.acquire_async(7).await.unwrap();
        assert_eq!(task_limiter.count_async(), 7);
        task_ready_tx.send(()).unwrap();
        task_release_rx.await.unwrap();
        task_limiter.release_async(7).unwrap();
    });
    task_ready_rx.await.unwrap();

    assert_eq!(limiter.borrowed_tokens(), 2);
    assert_eq!(limiter.available_tokens(), 0);
    assert_eq!(limiter.borrowers().values().sum::<usize>(), 12);
    assert_accounting(&limiter);

    thread_release.send(()).unwrap();
    thread_holder.join().unwrap();
    task_release_tx.send(()).unwrap();
    task_holder.await.unwrap();

    assert_eq!(limiter.available_tokens(), 2);
    assert!(!limiter.in_use());
}
