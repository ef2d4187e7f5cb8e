//! Single-assignment result channel between a booking and its caller.
//!
//! [`channel`] returns a [`Completer`], moved into the region slot that runs
//! the booking, and a [`BookingHandle`] returned to the caller. The completer
//! resolves the shared slot exactly once; handles may be cloned and read any
//! number of times.

use crate::{BookingId, BookingResult, Error, Result};
use core::time::Duration;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::Instant;

struct Slot {
    booking: BookingId,
    outcome: Mutex<Option<Result<BookingResult>>>,
    ready: Condvar,
}

impl Slot {
    fn resolve(&self, outcome: Result<BookingResult>) {
        let mut guard = self.outcome.lock();
        assert!(
            guard.is_none(),
            "booking {} resolved more than once",
            self.booking
        );
        *guard = Some(outcome);
        self.ready.notify_all();
    }
}

pub(crate) fn channel(booking: BookingId) -> (Completer, BookingHandle) {
    let slot = Arc::new(Slot {
        booking,
        outcome: Mutex::new(None),
        ready: Condvar::new(),
    });
    (
        Completer {
            slot: Some(Arc::clone(&slot)),
        },
        BookingHandle { slot },
    )
}

/// Producing half. Resolves to [`Error::Abandoned`] if dropped unused.
pub(crate) struct Completer {
    slot: Option<Arc<Slot>>,
}

impl Completer {
    pub(crate) fn complete(mut self, outcome: Result<BookingResult>) {
        if let Some(slot) = self.slot.take() {
            slot.resolve(outcome);
        }
    }
}

impl Drop for Completer {
    fn drop(&mut self) {
        if let Some(slot) = self.slot.take() {
            let booking = slot.booking;
            slot.resolve(Err(Error::Abandoned { booking }));
        }
    }
}

/// The caller's view of a booking that is queued, running or finished.
#[derive(Clone)]
pub struct BookingHandle {
    slot: Arc<Slot>,
}

impl BookingHandle {
    /// Id assigned to the booking at admission.
    pub fn id(&self) -> BookingId {
        self.slot.booking
    }

    pub fn is_finished(&self) -> bool {
        self.slot.outcome.lock().is_some()
    }

    /// Returns the outcome if the booking has already finished.
    pub fn try_result(&self) -> Option<Result<BookingResult>> {
        self.slot.outcome.lock().clone()
    }

    /// Blocks until the booking finishes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if the simulation was aborted while the
    /// booking ran, or [`Error::Abandoned`] if the booking never produced an
    /// outcome.
    pub fn wait(&self) -> Result<BookingResult> {
        let mut guard = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return outcome.clone();
            }
            self.slot.ready.wait(&mut guard);
        }
    }

    /// Blocks until the booking finishes or `timeout` elapses, returning
    /// `None` in the latter case.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<BookingResult>> {
        let deadline = Instant::now() + timeout;
        let mut guard = self.slot.outcome.lock();
        loop {
            if let Some(outcome) = guard.as_ref() {
                return Some(outcome.clone());
            }
            if self.slot.ready.wait_until(&mut guard, deadline).timed_out() {
                return guard.clone();
            }
        }
    }
}

impl core::fmt::Debug for BookingHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("BookingHandle")
            .field("id", &self.slot.booking)
            .field("finished", &self.is_finished())
            .finish()
    }
}
