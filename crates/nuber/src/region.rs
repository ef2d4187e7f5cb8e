use crate::{
    Booking, BookingHandle, Dispatch, Error, Passenger, Result, dispatch::DispatchInner,
    handle::{self, Completer},
};
use core::time::Duration;
use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{
    Arc, Weak,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::thread;
use std::time::Instant;

/// A booking queued for a slot together with the half that resolves its
/// handle.
struct Job {
    booking: Booking,
    completer: Completer,
}

/// A named area with a fixed number of booking slots.
///
/// Each slot is a dedicated thread pulling bookings from the region's FIFO
/// queue, so at most `max_simultaneous_jobs` bookings of this region run at
/// once while any number may be queued. Regions share nothing with each
/// other; they only meet in the dispatch's driver pool.
pub struct Region {
    name: String,
    max_simultaneous_jobs: usize,
    dispatch: Weak<DispatchInner>,
    // `None` once the region has been told to shut down.
    admission: Mutex<Option<Sender<Job>>>,
    receiver: Mutex<Option<Receiver<Job>>>,
    slots: Arc<SlotState>,
}

#[derive(Default)]
struct SlotState {
    active: AtomicUsize,
    peak_active: AtomicUsize,
    completed: AtomicU64,
    live_workers: Mutex<usize>,
    drained: Condvar,
}

impl SlotState {
    fn enter(&self) {
        let current = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(current, Ordering::SeqCst);
    }

    fn exit(&self) {
        let previous = self.active.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(previous > 0, "region slot counter underflow");
        self.completed.fetch_add(1, Ordering::Relaxed);
    }
}

/// Marks a slot thread as gone when it exits, however it exits.
struct LiveWorker(Arc<SlotState>);

impl Drop for LiveWorker {
    fn drop(&mut self) {
        let mut live = self.0.live_workers.lock();
        *live -= 1;
        if *live == 0 {
            self.0.drained.notify_all();
        }
    }
}

impl Region {
    pub(crate) fn new(
        dispatch: Weak<DispatchInner>,
        name: impl Into<String>,
        max_simultaneous_jobs: usize,
    ) -> Self {
        let (tx, rx) = unbounded();
        Self {
            name: name.into(),
            max_simultaneous_jobs,
            dispatch,
            admission: Mutex::new(Some(tx)),
            receiver: Mutex::new(Some(rx)),
            slots: Arc::new(SlotState::default()),
        }
    }

    /// Spawns the slot threads. Calling it again is a no-op.
    pub(crate) fn start(&self) -> Result<()> {
        let Some(rx) = self.receiver.lock().take() else {
            return Ok(());
        };
        for slot in 0..self.max_simultaneous_jobs {
            let rx = rx.clone();
            let state = Arc::clone(&self.slots);
            let region = self.name.clone();
            *self.slots.live_workers.lock() += 1;
            let spawned = thread::Builder::new()
                .name(format!("{}-slot-{slot}", self.name))
                .spawn(move || slot_loop(&region, slot, &rx, state));
            if let Err(e) = spawned {
                let mut live = self.slots.live_workers.lock();
                *live -= 1;
                if *live == 0 {
                    self.slots.drained.notify_all();
                }
                return Err(Error::WorkerSpawn {
                    region: self.name.clone(),
                    reason: e.to_string(),
                });
            }
        }
        tracing::debug!(
            region = %self.name,
            slots = self.max_simultaneous_jobs,
            "region started"
        );
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn max_simultaneous_jobs(&self) -> usize {
        self.max_simultaneous_jobs
    }

    /// Creates a booking for `passenger` and queues it for the next free
    /// slot.
    ///
    /// On success the dispatch's awaiting-driver counter has been
    /// incremented once for this booking.
    ///
    /// # Errors
    ///
    /// Returns [`Error::RegionShutdown`] if the region no longer accepts
    /// work. The booking id consumed for the attempt is rolled back and the
    /// awaiting-driver counter is untouched.
    pub fn book_passenger(&self, passenger: Passenger) -> Result<BookingHandle> {
        let Some(dispatch) = self.dispatch.upgrade().map(Dispatch::from_inner) else {
            return Err(self.shutdown_error());
        };
        let booking = Booking::new(dispatch.clone(), self.name.as_str(), passenger);

        let admission = self.admission.lock();
        let Some(queue) = admission.as_ref() else {
            drop(admission);
            dispatch.log_event(&booking, "Rejected booking");
            dispatch.counters().record_rejected();
            if !dispatch.release_booking_id(booking.id()) {
                tracing::warn!(
                    region = %self.name,
                    booking = %booking.id(),
                    "booking id could not be rolled back, a later id was already issued"
                );
            }
            return Err(self.shutdown_error());
        };

        dispatch.log_event(&booking, "Booking accepted, waiting for a slot");
        let (completer, handle) = handle::channel(booking.id());
        dispatch.booking_accepted();
        if queue.send(Job { booking, completer }).is_err() {
            // Every slot thread is gone; the job (and its completer) was
            // handed back inside the error and dropped with it.
            dispatch.withdraw_awaiting();
            return Err(self.shutdown_error());
        }
        tracing::debug!(region = %self.name, booking = %handle.id(), "booking queued");
        Ok(handle)
    }

    /// Stops admitting bookings. Queued and running bookings still run to
    /// completion, unless no driver is left to serve them. Idempotent.
    pub fn shutdown(&self) {
        if self.admission.lock().take().is_some() {
            tracing::info!(region = %self.name, "region shutting down");
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.admission.lock().is_none()
    }

    /// Bookings currently executing in a slot.
    pub fn active_bookings(&self) -> usize {
        self.slots.active.load(Ordering::SeqCst)
    }

    /// Highest number of bookings that ever executed at once.
    pub fn peak_active(&self) -> usize {
        self.slots.peak_active.load(Ordering::SeqCst)
    }

    /// Bookings admitted but not yet picked up by a slot.
    pub fn queued_bookings(&self) -> usize {
        self.admission.lock().as_ref().map_or(0, Sender::len)
    }

    /// Bookings that finished executing, successfully or not.
    pub fn completed_bookings(&self) -> u64 {
        self.slots.completed.load(Ordering::Relaxed)
    }

    /// Blocks until every slot thread has exited or `timeout` elapses.
    ///
    /// Slot threads exit once the region is shut down and its queue is
    /// drained. Returns `true` if they all did.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        self.await_termination_until(Instant::now() + timeout)
    }

    pub(crate) fn await_termination_until(&self, deadline: Instant) -> bool {
        let mut live = self.slots.live_workers.lock();
        while *live > 0 {
            if self.slots.drained.wait_until(&mut live, deadline).timed_out() {
                return *live == 0;
            }
        }
        true
    }

    fn shutdown_error(&self) -> Error {
        Error::RegionShutdown {
            region: self.name.clone(),
        }
    }
}

impl core::fmt::Debug for Region {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Region")
            .field("name", &self.name)
            .field("max_simultaneous_jobs", &self.max_simultaneous_jobs)
            .field("active", &self.active_bookings())
            .field("shutdown", &self.is_shutdown())
            .finish_non_exhaustive()
    }
}

/// Body of one slot thread: run queued bookings one at a time until the
/// region is shut down and the queue is empty.
fn slot_loop(region: &str, slot: usize, rx: &Receiver<Job>, state: Arc<SlotState>) {
    let _live = LiveWorker(Arc::clone(&state));
    tracing::trace!(region, slot, "slot started");

    while let Ok(Job { booking, completer }) = rx.recv() {
        let id = booking.id();
        state.enter();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| booking.execute()));
        state.exit();
        match outcome {
            Ok(outcome) => completer.complete(outcome),
            Err(_) => {
                // The completer resolves the handle as abandoned on drop.
                tracing::error!(region, slot, booking = %id, "booking panicked");
                drop(completer);
            }
        }
    }

    tracing::trace!(region, slot, "slot stopped");
}
