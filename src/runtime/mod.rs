//! Scheduling-model adapters: task identity and cooperative checkpoints.
//!
//! The limiters treat "who is calling" and "how to yield" as pluggable
//! per-model concerns. Blocking threads and tokio tasks each get one
//! identity resolver and one checkpoint; everything else in the crate is
//! model-agnostic.

pub mod checkpoint;
pub mod ident;

pub use checkpoint::*;
pub use ident::*;
