//! # Capacity Limiter
//!
//! Capacity-bounded synchronization primitives shared by async tasks and
//! blocking threads.
//!
//! A [`CapacityLimiter`] restricts how many logical tasks may concurrently
//! hold a resource token; a [`ReentrantCapacityLimiter`] additionally lets
//! a holder accumulate a variable-sized share without consuming extra
//! capacity. Both work identically whether the caller is a tokio task or a
//! plain OS thread — the two operation families share one ledger, one
//! slot [`Semaphore`], and one FIFO wait queue, so a release from either
//! side wakes the longest-waiting caller of either kind.
//!
//! ## Core Problem Solved
//!
//! Mixed workloads rarely live in a single scheduling model: an inference
//! server throttles tokio request handlers while the same model pool is
//! drained by dedicated worker threads. Per-runtime semaphores cannot
//! bound such a resource globally, and they cannot tell you *who* holds
//! capacity. This crate keeps an exact borrower ledger (task identity →
//! held units) next to the slot accounting and enforces precise misuse
//! semantics: double acquire, release without hold, and over-release each
//! fail fast with a typed [`LimiterError`] before any state changes.
//!
//! ## Key Features
//!
//! - **Dual API**: blocking (`acquire`/`release`) and async
//!   (`acquire_async`/`release_async`) families with identical semantics
//! - **Cross-model fairness**: one FIFO queue for threads and tasks; no
//!   barging, no starvation
//! - **Exact ledger**: introspect `total_tokens`, `available_tokens`,
//!   `borrowed_tokens`, `waiting`, and a snapshot of the borrowers map
//! - **Reentrant shares**: accumulate units on one slot, release them
//!   piecemeal, with over-release detection
//! - **Scoped acquisition**: RAII guards release on every exit path,
//!   including panics
//! - **Cancel-safe waits**: a cancelled or timed-out waiter leaves no
//!   trace and loses no capacity
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use capacity_limiter::CapacityLimiter;
//!
//! let limiter = Arc::new(CapacityLimiter::new(2));
//!
//! let mut handles = Vec::new();
//! for _ in 0..4 {
//!     let limiter = Arc::clone(&limiter);
//!     handles.push(thread::spawn(move || {
//!         let _guard = limiter.guard().unwrap();
//!         // At most two threads are in here at once.
//!     }));
//! }
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert_eq!(limiter.available_tokens(), 2);
//! ```
//!
//! The async family has the same shape (requires the default
//! `tokio-runtime` feature, and a real task — `block_on` roots have no
//! task identity):
//!
//! ```rust,ignore
//! let limiter = Arc::new(CapacityLimiter::new(8));
//! tokio::spawn({
//!     let limiter = Arc::clone(&limiter);
//!     async move {
//!         let _guard = limiter.guard_async().await?;
//!         run_inference().await
//!     }
//! });
//! ```

#![deny(warnings)]
#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Error taxonomy for limiter misuse.
pub mod error;
/// The non-reentrant capacity limiter and its guard.
pub mod limiter;
/// The reentrant capacity limiter and its guard.
pub mod reentrant;
/// Scheduling-model adapters: task identity and checkpoints.
pub mod runtime;
/// The dual-mode FIFO slot semaphore.
pub mod semaphore;
/// Shared utilities.
pub mod util;

mod ledger;

pub use error::{LimiterError, LimiterResult};
pub use limiter::{CapacityGuard, CapacityLimiter};
pub use reentrant::{ReentrantCapacityLimiter, ReentrantGuard};
pub use runtime::ident::TaskIdent;
pub use semaphore::{Acquire, Semaphore};
