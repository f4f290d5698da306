//! Worker wake signal
//!
//! A single-token signal: any number of posts before the worker waits
//! collapse into one wake-up. Posting never blocks and never allocates, so it
//! is safe from interrupt delivery context.

use crossbeam_utils::sync::{Parker, Unparker};

/// Posting side of the wake signal, cloned to every wake source
#[derive(Clone)]
pub struct WakeSignal {
    unparker: Unparker,
}

impl WakeSignal {
    /// Wake the worker, or leave a token for its next wait
    pub fn post(&self) {
        self.unparker.unpark();
    }
}

impl std::fmt::Debug for WakeSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WakeSignal").finish_non_exhaustive()
    }
}

/// Waiting side of the wake signal, owned by the worker
pub(crate) struct WakeWaiter {
    parker: Parker,
}

impl WakeWaiter {
    /// Block until a token is available and consume it
    pub(crate) fn wait(&self) {
        self.parker.park();
    }
}

/// Create a connected waiter/signal pair
pub(crate) fn wake_pair() -> (WakeWaiter, WakeSignal) {
    let parker = Parker::new();
    let unparker = parker.unparker().clone();
    (WakeWaiter { parker }, WakeSignal { unparker })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn test_post_before_wait_is_kept() {
        let (waiter, signal) = wake_pair();
        signal.post();
        // Returns immediately: the token was left for us
        waiter.wait();
    }

    #[test]
    fn test_posts_coalesce() {
        let (waiter, signal) = wake_pair();
        let woken = Arc::new(AtomicUsize::new(0));
        signal.post();
        signal.post();
        signal.post();

        let counter = woken.clone();
        let handle = std::thread::spawn(move || {
            waiter.wait();
            counter.fetch_add(1, Ordering::SeqCst);
            waiter.wait();
            counter.fetch_add(1, Ordering::SeqCst);
        });

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(woken.load(Ordering::SeqCst), 1);

        signal.post();
        handle.join().unwrap();
        assert_eq!(woken.load(Ordering::SeqCst), 2);
    }
}
