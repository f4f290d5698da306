//! Interrupt bridge
//!
//! Turns a hardware interrupt into a worker wake-up. The bridge never touches
//! the bus: all register access happens on the worker thread.

use crate::signal::WakeSignal;

/// Handle passed to the platform's interrupt binding
#[derive(Debug, Clone)]
pub struct InterruptBridge {
    wake: WakeSignal,
}

impl InterruptBridge {
    pub(crate) fn new(wake: WakeSignal) -> Self {
        Self { wake }
    }

    /// Called for every interrupt edge
    ///
    /// Does not block or allocate and may run concurrently with the worker
    /// in any state.
    pub fn on_interrupt(&self) {
        self.wake.post();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signal::wake_pair;

    #[test]
    fn test_interrupt_wakes_worker() {
        let (waiter, signal) = wake_pair();
        let bridge = InterruptBridge::new(signal);
        let remote = bridge.clone();
        std::thread::spawn(move || remote.on_interrupt())
            .join()
            .unwrap();
        waiter.wait();
    }
}
