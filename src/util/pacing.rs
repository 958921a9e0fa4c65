use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Leading-edge rate limiter: runs the action immediately, then drops every
/// call that lands within `delay` of the last executed one. The drop decision
/// is a single compare-and-swap, so concurrent callers race at most one
/// execution per window.
#[derive(Debug)]
pub struct Throttle {
    delay: Duration,
    origin: Instant,
    // Nanoseconds since `origin` of the last executed call, +1 so that zero
    // can mean "never fired".
    last: AtomicU64,
}

impl Throttle {
    pub fn new(delay: Duration) -> Self {
        Throttle {
            delay,
            origin: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    /// Run `f` if the window allows it. Returns whether `f` ran.
    /// A zero delay is the identity wrapper.
    pub fn call<F: FnOnce()>(&self, f: F) -> bool {
        if self.delay.is_zero() {
            f();
            return true;
        }
        let now = self.origin.elapsed().as_nanos() as u64 + 1;
        let last = self.last.load(Ordering::Acquire);
        if last != 0 && Duration::from_nanos(now - last) < self.delay {
            return false;
        }
        if self
            .last
            .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            f();
            true
        } else {
            // Another caller won the window.
            false
        }
    }
}

/// Trailing-edge coalescer: the action runs once, `delay` after the last call
/// in a burst. Every call during the waiting window cancels the pending
/// execution and restarts the timer.
pub struct Debounce {
    delay: Duration,
    action: Arc<dyn Fn() + Send + Sync>,
    generation: Arc<AtomicU64>,
}

impl Debounce {
    pub fn new<F: Fn() + Send + Sync + 'static>(delay: Duration, action: F) -> Self {
        Debounce {
            delay,
            action: Arc::new(action),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule (or reschedule) the action. Must be called from within a
    /// tokio runtime.
    pub fn call(&self) {
        let armed = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let generation = Arc::clone(&self.generation);
        let action = Arc::clone(&self.action);
        let delay = self.delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only the latest call in the burst fires.
            if generation.load(Ordering::Acquire) == armed {
                action();
            }
        });
    }
}

impl std::fmt::Debug for Debounce {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Debounce").field("delay", &self.delay).finish()
    }
}
