//! Cooperative cancellation.
//!
//! OS signal handlers only flip the flag inside a [`Shutdown`] handle; the
//! monitor and search loops poll it at their checkpoints and wind down on
//! their own (flush, persist, summarize).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Longest uninterrupted nap inside [`Shutdown::sleep`].
const SLEEP_SLICE: Duration = Duration::from_millis(100);

/// Cloneable stop flag shared between the signal task and a loop.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    requested: Arc<AtomicBool>,
}

impl Shutdown {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of this handle to stop at its next checkpoint.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Sleep for `duration`, waking early if shutdown is requested.
    ///
    /// Returns `true` if the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_requested() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep((deadline - now).min(SLEEP_SLICE));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let a = Shutdown::new();
        let b = a.clone();
        assert!(!b.is_requested());
        a.request();
        assert!(b.is_requested());
    }

    #[test]
    fn sleep_completes_without_request() {
        let s = Shutdown::new();
        assert!(s.sleep(Duration::from_millis(5)));
    }

    #[test]
    fn sleep_wakes_early_on_request() {
        let s = Shutdown::new();
        let remote = s.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            remote.request();
        });
        let started = Instant::now();
        assert!(!s.sleep(Duration::from_secs(30)));
        assert!(started.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
