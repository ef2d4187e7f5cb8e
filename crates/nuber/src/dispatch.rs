use crate::{
    BookingHandle, BookingId, BookingIdGenerator, CancellationToken, Driver, Error, Passenger,
    Region, Result,
    pool::{DEFAULT_IDLE_CAPACITY, DriverPool},
};
use core::{fmt, time::Duration};
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;
use std::sync::{
    Arc,
    atomic::{AtomicU64, AtomicUsize, Ordering},
};
use std::time::Instant;

/// Booking ids are unique across every dispatch in the process.
static BOOKING_IDS: BookingIdGenerator = BookingIdGenerator::new();

/// Settings for a [`Dispatch`].
///
/// ```
/// use nuber::{Dispatch, DispatchConfig};
///
/// let config = DispatchConfig::new()
///     .region("Primary", 10)
///     .region("Rural", 1)
///     .log_events(false);
/// let dispatch = Dispatch::from_config(config).unwrap();
/// assert_eq!(dispatch.region_names(), ["Primary", "Rural"]);
/// dispatch.shutdown();
/// ```
#[derive(Clone, Debug)]
pub struct DispatchConfig {
    regions: Vec<(String, usize)>,
    log_events: bool,
    idle_capacity: usize,
    ids: &'static BookingIdGenerator,
}

impl DispatchConfig {
    pub fn new() -> Self {
        Self {
            regions: Vec::new(),
            log_events: false,
            idle_capacity: DEFAULT_IDLE_CAPACITY,
            ids: &BOOKING_IDS,
        }
    }

    /// Adds a region allowed to run `max_simultaneous_jobs` bookings at once.
    #[must_use]
    pub fn region(mut self, name: impl Into<String>, max_simultaneous_jobs: usize) -> Self {
        self.regions.push((name.into(), max_simultaneous_jobs));
        self
    }

    #[must_use]
    pub fn regions<I, S>(self, regions: I) -> Self
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        regions
            .into_iter()
            .fold(self, |config, (name, max)| config.region(name, max))
    }

    /// Emits one `nuber::event` record per booking lifecycle step.
    #[must_use]
    pub fn log_events(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Maximum number of idle drivers held at once. Adding a driver beyond it
    /// blocks until one is taken.
    #[must_use]
    pub fn idle_capacity(mut self, capacity: usize) -> Self {
        self.idle_capacity = capacity;
        self
    }

    /// Draws booking ids from `ids` instead of the process-wide generator.
    #[cfg(test)]
    #[must_use]
    pub(crate) fn id_generator(mut self, ids: &'static BookingIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an empty or duplicate region
    /// name, a region with no slots, or a zero idle capacity.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| -> Result<()> { Err(Error::InvalidConfig { reason }) };
        if self.idle_capacity == 0 {
            return invalid("idle driver capacity must be non-zero".into());
        }
        let mut seen = std::collections::HashSet::new();
        for (name, max) in &self.regions {
            if name.trim().is_empty() {
                return invalid("region name must not be empty".into());
            }
            if *max == 0 {
                return invalid(format!("region {name} must allow at least one job"));
            }
            if !seen.insert(name.as_str()) {
                return invalid(format!("region {name} is configured twice"));
            }
        }
        Ok(())
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time counters over the life of a [`Dispatch`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Bookings admitted by a region.
    pub accepted: u64,
    /// Booking attempts refused because the region was shut down.
    pub rejected: u64,
    pub drivers_assigned: u64,
    pub drivers_released: u64,
    /// Bookings that reached their destination.
    pub completed: u64,
    /// Bookings that ended early, usually through [`Dispatch::abort`].
    pub aborted: u64,
    /// Bookings that gave up waiting because their region was shut down and
    /// no driver was left to serve them.
    pub unserved: u64,
}

#[derive(Default)]
pub(crate) struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    drivers_assigned: AtomicU64,
    drivers_released: AtomicU64,
    completed: AtomicU64,
    aborted: AtomicU64,
    unserved: AtomicU64,
}

impl Counters {
    pub(crate) fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_aborted(&self) {
        self.aborted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_unserved(&self) {
        self.unserved.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> DispatchStats {
        DispatchStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            drivers_assigned: self.drivers_assigned.load(Ordering::Relaxed),
            drivers_released: self.drivers_released.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
            unserved: self.unserved.load(Ordering::Relaxed),
        }
    }
}

pub(crate) struct DispatchInner {
    regions: BTreeMap<String, Region>,
    idle: DriverPool,
    // Serializes probes so the take and the waitlist decrement happen
    // together. Adding a driver never takes it.
    probe: Mutex<()>,
    awaiting: AtomicUsize,
    // Drivers out on a booking. Changes under `probe` when a booking takes
    // one, and only after the driver is back in the pool when it returns.
    leased: AtomicUsize,
    ids: &'static BookingIdGenerator,
    // Bumped whenever a driver becomes idle or the run is aborted.
    availability: Mutex<u64>,
    driver_freed: Condvar,
    cancel: CancellationToken,
    counters: Counters,
    log_events: bool,
}

/// Central coordinator of a simulation run.
///
/// Owns the regions, the pool of idle drivers and the count of bookings
/// still waiting for one. Cloning is cheap and every clone refers to the same
/// run.
#[derive(Clone)]
pub struct Dispatch {
    inner: Arc<DispatchInner>,
}

impl Dispatch {
    /// Builds a dispatch with one region per `(name, max_simultaneous_jobs)`
    /// pair and starts every region's slots.
    ///
    /// # Errors
    ///
    /// See [`Dispatch::from_config`].
    pub fn new<I, S>(regions: I, log_events: bool) -> Result<Self>
    where
        I: IntoIterator<Item = (S, usize)>,
        S: Into<String>,
    {
        Self::from_config(
            DispatchConfig::new()
                .regions(regions)
                .log_events(log_events),
        )
    }

    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if `config` does not validate and
    /// [`Error::WorkerSpawn`] if a slot thread could not be started. In the
    /// latter case regions already started are shut down again.
    pub fn from_config(config: DispatchConfig) -> Result<Self> {
        config.validate()?;
        let DispatchConfig {
            regions,
            log_events,
            idle_capacity,
            ids,
        } = config;

        let inner = Arc::new_cyclic(|weak| DispatchInner {
            regions: regions
                .into_iter()
                .map(|(name, max)| (name.clone(), Region::new(weak.clone(), name, max)))
                .collect(),
            idle: DriverPool::with_capacity(idle_capacity),
            probe: Mutex::new(()),
            awaiting: AtomicUsize::new(0),
            leased: AtomicUsize::new(0),
            ids,
            availability: Mutex::new(0),
            driver_freed: Condvar::new(),
            cancel: CancellationToken::new(),
            counters: Counters::default(),
            log_events,
        });
        let dispatch = Self { inner };

        for region in dispatch.inner.regions.values() {
            if let Err(e) = region.start() {
                tracing::error!(region = %region.name(), error = %e, "failed to start region");
                dispatch.shutdown();
                return Err(e);
            }
        }
        tracing::info!(
            regions = dispatch.inner.regions.len(),
            idle_capacity,
            log_events,
            "dispatch started"
        );
        Ok(dispatch)
    }

    pub(crate) fn from_inner(inner: Arc<DispatchInner>) -> Self {
        Self { inner }
    }

    /// Makes `driver` available to waiting bookings.
    ///
    /// Blocks while the idle pool is full. Returns `true` once the driver is
    /// in the pool.
    pub fn add_driver(&self, driver: Driver) -> bool {
        tracing::trace!(driver = %driver.name(), "driver idle");
        let added = self.inner.idle.put(driver);
        if added {
            self.signal_availability();
        }
        added
    }

    /// Hands out an idle driver, if any.
    ///
    /// A successful take also removes one booking from the awaiting-driver
    /// count.
    pub fn get_driver(&self) -> Option<Driver> {
        let _probe = self.inner.probe.lock();
        self.take_idle()
    }

    /// Like [`Dispatch::get_driver`], but the driver counts as leased until
    /// it comes back through [`Dispatch::release_driver`].
    pub(crate) fn lease_driver(&self) -> Option<Driver> {
        let _probe = self.inner.probe.lock();
        let driver = self.take_idle()?;
        self.inner.leased.fetch_add(1, Ordering::SeqCst);
        Some(driver)
    }

    /// Whether no driver is idle and none is out on a booking, so no driver
    /// can come back for a booking that keeps waiting.
    pub(crate) fn drivers_exhausted(&self) -> bool {
        let _probe = self.inner.probe.lock();
        self.inner.leased.load(Ordering::SeqCst) == 0 && self.inner.idle.is_empty()
    }

    // Callers hold the probe lock.
    fn take_idle(&self) -> Option<Driver> {
        let driver = self.inner.idle.try_take()?;
        let previous = self
            .inner
            .awaiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            tracing::error!(
                driver = %driver.name(),
                "driver handed out with no booking awaiting one"
            );
            debug_assert!(false, "awaiting-driver count underflow");
        }
        self.inner
            .counters
            .drivers_assigned
            .fetch_add(1, Ordering::Relaxed);
        Some(driver)
    }

    /// Books `passenger` into the region called `region`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownRegion`] if there is no such region, or
    /// [`Error::RegionShutdown`] if it no longer accepts bookings.
    #[tracing::instrument(level = "debug", skip(self, passenger), fields(passenger = %passenger.name()))]
    pub fn book_passenger(&self, passenger: Passenger, region: &str) -> Result<BookingHandle> {
        let Some(target) = self.inner.regions.get(region) else {
            tracing::warn!("no such region");
            return Err(Error::UnknownRegion {
                region: region.to_owned(),
            });
        };
        target.book_passenger(passenger)
    }

    /// Writes one lifecycle record for `booking` when event logging is on.
    pub fn log_event(&self, booking: &dyn fmt::Display, message: &str) {
        if self.inner.log_events {
            tracing::info!(target: "nuber::event", "{booking} : {message}");
        }
    }

    /// Bookings that were admitted but have not been given a driver yet.
    pub fn bookings_awaiting_driver(&self) -> usize {
        self.inner.awaiting.load(Ordering::SeqCst)
    }

    pub fn idle_drivers(&self) -> usize {
        self.inner.idle.len()
    }

    pub fn stats(&self) -> DispatchStats {
        self.inner.counters.snapshot()
    }

    pub fn region(&self, name: &str) -> Option<&Region> {
        self.inner.regions.get(name)
    }

    /// Region names in sorted order.
    pub fn region_names(&self) -> Vec<&str> {
        self.inner.regions.keys().map(String::as_str).collect()
    }

    /// Stops every region from admitting bookings. Bookings already
    /// admitted still run to completion, except those left waiting with no
    /// driver in the pool or on a trip: they resolve without one.
    pub fn shutdown(&self) {
        tracing::info!("dispatch shutting down");
        for region in self.inner.regions.values() {
            region.shutdown();
        }
        self.signal_availability();
    }

    /// Shuts down and cancels the run: sleeping drivers wake up, bookings
    /// waiting for a driver give up, and queued bookings end without
    /// starting. Every driver held by a booking returns to the idle pool.
    pub fn abort(&self) {
        tracing::warn!("dispatch aborting");
        self.inner.cancel.cancel();
        self.shutdown();
        self.signal_availability();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Blocks until every region's slots have exited or `timeout` elapses.
    /// Returns `true` if they all did.
    pub fn await_termination(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        self.inner
            .regions
            .values()
            .all(|region| region.await_termination_until(deadline))
    }

    pub(crate) fn next_booking_id(&self) -> BookingId {
        self.inner.ids.next_id()
    }

    pub(crate) fn release_booking_id(&self, id: BookingId) -> bool {
        self.inner.ids.release(id)
    }

    pub(crate) fn counters(&self) -> &Counters {
        &self.inner.counters
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    /// Accounts for a booking a region just admitted.
    pub(crate) fn booking_accepted(&self) {
        self.inner.awaiting.fetch_add(1, Ordering::SeqCst);
        self.inner.counters.record_accepted();
    }

    /// Takes back the waitlist entry of a booking that gives up before
    /// getting a driver.
    pub(crate) fn withdraw_awaiting(&self) {
        let previous = self
            .inner
            .awaiting
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            tracing::error!("awaiting-driver count withdrawn below zero");
            debug_assert!(false, "awaiting-driver count underflow");
        }
    }

    pub(crate) fn release_driver(&self, driver: Driver) {
        self.inner
            .counters
            .drivers_released
            .fetch_add(1, Ordering::Relaxed);
        self.add_driver(driver);
        let previous = self
            .inner
            .leased
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if previous.is_err() {
            tracing::error!("driver released without a lease");
            debug_assert!(false, "leased driver count underflow");
        }
    }

    pub(crate) fn driver_generation(&self) -> u64 {
        *self.inner.availability.lock()
    }

    /// Parks for up to `timeout` unless a driver was freed since `seen` was
    /// read or the run is cancelled.
    pub(crate) fn wait_for_driver(&self, seen: u64, timeout: Duration) {
        let mut generation = self.inner.availability.lock();
        if *generation == seen && !self.inner.cancel.is_cancelled() {
            self.inner.driver_freed.wait_for(&mut generation, timeout);
        }
    }

    fn signal_availability(&self) {
        let mut generation = self.inner.availability.lock();
        *generation = generation.wrapping_add(1);
        self.inner.driver_freed.notify_all();
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("regions", &self.region_names())
            .field("idle_drivers", &self.idle_drivers())
            .field("awaiting", &self.bookings_awaiting_driver())
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}
