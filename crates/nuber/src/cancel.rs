use crate::{Error, Result};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

/// A blocking cancellation token shared by every simulated wait of a
/// dispatch.
///
/// Cloning is cheap; all clones observe the same state. Once cancelled the
/// token stays cancelled.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancels the token and wakes every thread sleeping on it.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Blocks the calling thread for `duration`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the token is, or becomes, cancelled
    /// before the duration has elapsed.
    pub fn sleep(&self, duration: Duration) -> Result<()> {
        let deadline = Instant::now() + duration;
        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(Error::Cancelled);
            }
            if self.inner.wake.wait_until(&mut cancelled, deadline).timed_out() {
                return if *cancelled {
                    Err(Error::Cancelled)
                } else {
                    Ok(())
                };
            }
        }
    }
}
