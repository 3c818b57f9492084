//! Monotonic time source.
//!
//! Per spec.md §1 Non-goals, the dispatcher does not assume an authoritative
//! global clock — only that a single process's monotonic clock is good
//! enough for timeout arithmetic (dispatch windows, watchdog TTLs). This
//! trait exists so tests can fast-forward simulated time instead of
//! sleeping, the same role `Interrupter`/`tokio::time::pause` play in the
//! teacher's job system tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A source of monotonically increasing seconds since some unspecified
/// epoch. Only deltas between two readings are meaningful.
pub trait Clock: Send + Sync + 'static {
    fn now_secs(&self) -> u64;
}

/// Real wall/monotonic clock, backed by `std::time::Instant`.
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            start: std::time::Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_secs(&self) -> u64 {
        self.start.elapsed().as_secs()
    }
}

/// Test clock that only advances when told to.
#[derive(Clone, Default)]
pub struct FakeClock {
    secs: Arc<AtomicU64>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, delta_secs: u64) {
        self.secs.fetch_add(delta_secs, Ordering::SeqCst);
    }
}

impl Clock for FakeClock {
    fn now_secs(&self) -> u64 {
        self.secs.load(Ordering::SeqCst)
    }
}
