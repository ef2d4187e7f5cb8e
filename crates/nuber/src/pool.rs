use crate::Driver;
use crossbeam_channel::{Receiver, Sender, bounded};

/// Default number of idle drivers the pool can hold.
pub const DEFAULT_IDLE_CAPACITY: usize = 999;

/// Bounded multi-producer/multi-consumer store of idle drivers.
///
/// Insertion blocks while the pool is full; removal never blocks. A driver is
/// handed to exactly one taker.
pub(crate) struct DriverPool {
    tx: Sender<Driver>,
    rx: Receiver<Driver>,
}

impl DriverPool {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "driver pool capacity must be non-zero");
        let (tx, rx) = bounded(capacity);
        Self { tx, rx }
    }

    /// Adds a driver, waiting for room if the pool is full.
    pub(crate) fn put(&self, driver: Driver) -> bool {
        // The pool owns a receiver, so the channel can never disconnect.
        self.tx.send(driver).is_ok()
    }

    /// Removes a driver if one is idle.
    pub(crate) fn try_take(&self) -> Option<Driver> {
        self.rx.try_recv().ok()
    }

    pub(crate) fn len(&self) -> usize {
        self.rx.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
