use std::time::Duration;

use tokio::sync::Semaphore;

/// Counting admission gate: up to `n` concurrent holders, with a deadline on
/// entry. `release` is unconditional, so a slot survives across task
/// boundaries without carrying a permit guard around.
///
/// A `release` without a matching successful `acquire` is a programming
/// error; the extra permit silently raises the effective capacity.
#[derive(Debug)]
pub struct Gate {
    sem: Semaphore,
    timeout: Duration,
}

impl Gate {
    pub fn new(n: usize, timeout: Duration) -> Self {
        Gate {
            sem: Semaphore::new(n),
            timeout,
        }
    }

    /// Wait for a slot. Returns `false` when the deadline passes first.
    /// A zero timeout blocks indefinitely and always returns `true`.
    pub async fn acquire(&self) -> bool {
        if self.timeout.is_zero() {
            match self.sem.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => unreachable!("gate semaphore is never closed"),
            }
            return true;
        }
        match tokio::time::timeout(self.timeout, self.sem.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                true
            }
            Ok(Err(_)) => unreachable!("gate semaphore is never closed"),
            Err(_) => false,
        }
    }

    /// Give a slot back. Must be called exactly once per successful `acquire`.
    pub fn release(&self) {
        self.sem.add_permits(1);
    }

    /// Slots currently free; used by introspection and tests.
    pub fn available(&self) -> usize {
        self.sem.available_permits()
    }
}
