use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Millisecond timestamp from a free-running 32-bit counter.
///
/// The counter wraps roughly every 49.7 days; every duration derived from it
/// must go through [`elapsed_ms`].
pub type Millis = u32;

/// Elapsed milliseconds between two readings of a wrapping 32-bit counter.
///
/// When `now` is behind `since` the counter is assumed to have wrapped exactly
/// once: `(u32::MAX - since) + now + 1`.
pub fn elapsed_ms(since: Millis, now: Millis) -> Millis {
    if now < since {
        (Millis::MAX - since).wrapping_add(now).wrapping_add(1)
    } else {
        now - since
    }
}

/// Converts a millisecond span to hours.
pub fn ms_to_hours(ms: Millis) -> f64 {
    ms as f64 / 3_600_000.0
}

/// Monotonic millisecond clock.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> Millis;
}

/// Process clock backed by [`Instant`], truncated to a wrapping 32-bit counter.
#[derive(Debug, Clone)]
pub struct SystemClock {
    started: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> Millis {
        // Truncation is the wraparound.
        self.started.elapsed().as_millis() as Millis
    }
}

/// Hand-driven clock for tests and replay. Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn starting_at(ms: Millis) -> Self {
        Self {
            now: Arc::new(AtomicU32::new(ms)),
        }
    }

    /// Moves the clock forward, wrapping like the hardware counter.
    pub fn advance(&self, ms: Millis) {
        let current = self.now.load(Ordering::SeqCst);
        self.now.store(current.wrapping_add(ms), Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> Millis {
        self.now.load(Ordering::SeqCst)
    }
}
