//! Stop handles for polling loops.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Continuation flag shared between a polling loop and whoever stops it.
///
/// The loop checks the flag once per cycle, so a wait already in progress
/// completes and at most one more cycle runs after [`stop`](Self::stop).
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// A handle that stops when the process receives Ctrl-C.
    pub fn on_ctrl_c() -> Self {
        let handle = Self::new();
        let remote = handle.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::debug!("interrupt received, stopping");
                remote.stop();
            }
        });
        handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_shared() {
        let handle = StopHandle::new();
        let clone = handle.clone();
        assert!(!handle.is_stopped());
        clone.stop();
        assert!(handle.is_stopped());
    }

    #[tokio::test]
    async fn test_loop_stops_after_flag() {
        let handle = StopHandle::new();
        let remote = handle.clone();
        let mut cycles = 0;
        while !handle.is_stopped() {
            cycles += 1;
            if cycles == 3 {
                remote.stop();
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(cycles, 3);
    }
}
