//! Timer Handle abstraction (`spec.md` §3.1, §9 Design Notes).
//!
//! The original ties timer callbacks directly to a context pointer,
//! forming the `Context <-> Procedure <-> Timer` cycle the spec calls out
//! under "EMM context cyclic references". We break it the way the spec
//! prescribes: a fired timer only knows a `ue_id`; the handler re-resolves
//! the context through the [`crate::context::ContextStore`] and is a
//! no-op if the context is already gone.
//!
//! Built on `tokio::time::sleep` + `tokio::spawn`, the same primitives the
//! teacher daemon uses for its background tasks
//! (`examples/BeigeBox-rayhunter/daemon/src/display/mod.rs`).

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// A single armed deadline. Dropping it disarms the timer; it never
/// fires after being dropped or explicitly stopped.
pub struct TimerHandle {
    join: JoinHandle<()>,
}

impl TimerHandle {
    /// Spawns a task that sleeps for `duration` then runs `on_fire`.
    /// `on_fire` should re-resolve its target (typically by `ue_id`)
    /// rather than closing over any context state directly.
    pub fn arm<F, Fut>(duration: Duration, on_fire: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let join = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            on_fire().await;
        });
        TimerHandle { join }
    }

    /// Disarms the timer; if it already fired, this is a no-op.
    pub fn stop(self) {
        self.join.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.join.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn fires_after_duration() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let _handle = TimerHandle::arm(Duration::from_millis(10), move || async move {
            fired_clone.store(true, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn stopping_prevents_fire() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        let handle = TimerHandle::arm(Duration::from_millis(20), move || async move {
            fired_clone.store(true, Ordering::SeqCst);
        });
        handle.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn dropping_disarms_like_stop() {
        let fired = Arc::new(AtomicBool::new(false));
        let fired_clone = fired.clone();
        {
            let _handle = TimerHandle::arm(Duration::from_millis(20), move || async move {
                fired_clone.store(true, Ordering::SeqCst);
            });
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!fired.load(Ordering::SeqCst));
    }
}
