//! Bounded polling wait
//!
//! Runs on tokio timers, so a paused test clock skips the waiting.

use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Poll a condition until it holds or the timeout passes
#[derive(Debug, Clone, Copy)]
pub struct BoundedWait {
    timeout: Duration,
    poll_interval: Duration,
}

impl BoundedWait {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    /// Returns whether `ready` held before the timeout
    pub async fn until<F>(&self, mut ready: F) -> bool
    where
        F: FnMut() -> bool,
    {
        let start = Instant::now();
        loop {
            if ready() {
                return true;
            }
            if start.elapsed() >= self.timeout {
                return false;
            }
            sleep(self.poll_interval).await;
        }
    }
}
