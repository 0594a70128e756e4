//! Reentrant configuration lock.
//!
//! While held, the telemetry poller skips its reads so that configuration
//! round trips never compete with telemetry for the request gate. The lock
//! is a depth counter: nested acquisitions are allowed, and only the
//! outermost one waits for a settle delay that lets an in-flight telemetry
//! exchange finish.
//!
//! Each guard remembers the connection generation it was taken in. A reset
//! on disconnect starts a new generation, and guards from an older one no
//! longer affect the depth when they are dropped.

use crate::client::lock;
use log::trace;
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Default, Debug)]
struct Counter {
    generation: u64,
    depth: usize,
}

/// Depth counter shared between the client and its telemetry poller.
#[derive(Debug)]
pub struct ConfigLock {
    counter: Arc<Mutex<Counter>>,
    settle: Duration,
}

impl ConfigLock {
    /// Constructs an unheld lock with the given settle delay.
    #[must_use]
    pub fn new(settle: Duration) -> Self {
        Self {
            counter: Arc::default(),
            settle,
        }
    }

    /// Acquires the lock.
    ///
    /// The depth is incremented before the settle delay, so that the poller
    /// already backs off while the delay elapses. If the returned future is
    /// cancelled, the guard is dropped and the depth restored.
    pub async fn acquire(&self) -> ConfigLockGuard {
        let (generation, depth) = {
            let mut counter = lock(&self.counter);

            counter.depth += 1;
            (counter.generation, counter.depth)
        };
        let guard = ConfigLockGuard {
            counter: self.counter.clone(),
            generation,
        };

        trace!("Config lock acquired at depth {depth}");

        if depth == 1 {
            tokio::time::sleep(self.settle).await;
        }

        guard
    }

    /// Returns the current nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        lock(&self.counter).depth
    }

    /// Returns `true` if the lock is held at any depth.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.depth() > 0
    }

    /// Releases all levels after the connection context was torn down.
    ///
    /// Guards still alive from before the reset become inert.
    pub(crate) fn reset(&self) {
        let mut counter = lock(&self.counter);

        counter.generation += 1;
        counter.depth = 0;
    }
}

/// Releases one level of the [`ConfigLock`] when dropped.
#[must_use = "the lock is released when the guard is dropped"]
#[derive(Debug)]
pub struct ConfigLockGuard {
    counter: Arc<Mutex<Counter>>,
    generation: u64,
}

impl Drop for ConfigLockGuard {
    fn drop(&mut self) {
        let mut counter = lock(&self.counter);

        if counter.generation == self.generation {
            counter.depth -= 1;
        } else {
            trace!("Dropping config lock guard from before a reset");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn settle_only_on_outermost() {
        let lock = ConfigLock::new(Duration::from_millis(100));
        let start = Instant::now();
        let outer = lock.acquire().await;

        assert!(
            start.elapsed() >= Duration::from_millis(100),
            "outermost should settle"
        );

        let start = Instant::now();
        let inner = lock.acquire().await;

        assert_eq!(start.elapsed(), Duration::ZERO, "nested should not settle");
        assert_eq!(lock.depth(), 2);

        drop(inner);

        assert!(lock.is_held(), "outer guard should keep the lock");

        drop(outer);

        assert!(!lock.is_held(), "lock should be released");
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_acquire_releases() {
        let lock = ConfigLock::new(Duration::from_millis(100));
        let res = tokio::time::timeout(Duration::from_millis(10), lock.acquire()).await;

        assert!(res.is_err(), "acquire should still be settling");
        assert_eq!(lock.depth(), 0, "cancelled acquire should not leak depth");
    }

    #[tokio::test(start_paused = true)]
    async fn stale_guard_after_reset() {
        let lock = ConfigLock::new(Duration::from_millis(100));
        let stale = lock.acquire().await;

        lock.reset();

        assert!(!lock.is_held(), "reset should release the lock");

        let fresh = lock.acquire().await;

        drop(stale);

        assert_eq!(lock.depth(), 1, "stale guard should not release the fresh one");
        assert!(lock.is_held());

        drop(fresh);

        assert!(!lock.is_held());
    }
}
