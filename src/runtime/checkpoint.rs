//! Cooperative yield points, one per scheduling model.
//!
//! A checkpoint gives the scheduler a chance to run other ready tasks
//! without blocking the caller and without touching any limiter state. The
//! reentrant limiter inserts one on its no-suspend fast paths so that a
//! tight reentrant-acquire loop cannot starve its peers of scheduling
//! turns.

/// Yield the calling thread's remaining timeslice to the OS scheduler.
pub fn blocking_checkpoint() {
    std::thread::yield_now();
}

/// Yield the calling task back to the tokio scheduler once.
#[cfg(feature = "tokio-runtime")]
pub async fn async_checkpoint() {
    tokio::task::yield_now().await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_checkpoint_returns() {
        blocking_checkpoint();
    }

    #[cfg(feature = "tokio-runtime")]
    #[tokio::test]
    async fn test_async_checkpoint_resumes() {
        async_checkpoint().await;
    }
}
