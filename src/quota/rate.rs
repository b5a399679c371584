use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fixed-window request counter.
///
/// At most `max_requests` acquisitions succeed within one window; the
/// window restarts on the first acquisition after it elapses.
#[derive(Debug)]
pub struct RateLimiter {
    max_requests: u32,
    window: Duration,
    state: Mutex<Window>,
}

#[derive(Debug)]
struct Window {
    started: Instant,
    count: u32,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            state: Mutex::new(Window {
                started: Instant::now(),
                count: 0,
            }),
        }
    }

    pub fn try_acquire(&self) -> bool {
        self.try_acquire_at(Instant::now())
    }

    pub fn try_acquire_at(&self, now: Instant) -> bool {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if now.saturating_duration_since(state.started) >= self.window {
            state.started = now;
            state.count = 0;
        }
        if state.count >= self.max_requests {
            return false;
        }
        state.count += 1;
        true
    }

    /// Time until the current window closes.
    pub fn retry_after(&self) -> Duration {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        self.window
            .saturating_sub(Instant::now().saturating_duration_since(state.started))
    }
}
