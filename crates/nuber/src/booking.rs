use crate::{BookingId, Dispatch, Driver, Error, Passenger, Region, Result};
use core::{fmt, time::Duration};
use crossbeam_utils::Backoff;
use std::time::Instant;

/// How long a booking parks on the driver-availability signal before probing
/// the idle pool again.
const DRIVER_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Lifecycle of a booking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BookingState {
    /// Accepted by a region, not yet started by a slot.
    Created,
    /// Running in a slot, probing dispatch for an idle driver.
    AwaitingDriver,
    /// A driver is on the way to the passenger.
    PickingUp,
    /// The passenger is on board.
    Travelling,
    /// The passenger arrived and the driver is idle again.
    Completed,
    /// The simulation was cancelled before the booking completed.
    Aborted,
    /// The region shut down while no driver was idle or on a trip.
    Unserved,
}

/// Final record of a finished booking.
#[derive(Clone, Debug)]
pub struct BookingResult {
    pub booking_id: BookingId,
    /// Snapshot of the driver at drop-off, `None` if the booking went
    /// unserved.
    pub driver: Option<Driver>,
    pub passenger: Option<Passenger>,
    /// Simulated pickup delay plus travel time.
    pub trip_duration: Duration,
    /// Wall-clock time from booking creation to arrival.
    pub elapsed: Duration,
}

/// One passenger's trip, from admission to drop-off.
///
/// A booking is created by a [`Region`] and executed exactly once by one of
/// its slots. Execution probes the dispatch for a driver until one is free,
/// then runs the pickup and travel phases with it and returns the driver to
/// the idle pool, even if the trip was cancelled half-way.
///
/// [`Region`]: crate::Region
pub struct Booking {
    id: BookingId,
    dispatch: Dispatch,
    region: String,
    passenger: Passenger,
    driver: Option<String>,
    state: BookingState,
    created_at: Instant,
}

impl Booking {
    /// Creates a booking, consuming the next booking id.
    pub(crate) fn new(
        dispatch: Dispatch,
        region: impl Into<String>,
        passenger: Passenger,
    ) -> Self {
        let booking = Self {
            id: dispatch.next_booking_id(),
            dispatch,
            region: region.into(),
            passenger,
            driver: None,
            state: BookingState::Created,
            created_at: Instant::now(),
        };
        booking.dispatch.log_event(&booking, "Creating booking");
        booking
    }

    pub fn id(&self) -> BookingId {
        self.id
    }

    pub fn state(&self) -> BookingState {
        self.state
    }

    pub fn passenger(&self) -> &Passenger {
        &self.passenger
    }

    /// Name of the assigned driver, once there is one.
    pub fn driver_name(&self) -> Option<&str> {
        self.driver.as_deref()
    }

    /// Runs the booking to completion.
    ///
    /// Cancellation ends the booking early; a driver it already held is
    /// back in the idle pool by the time this returns.
    pub(crate) fn execute(mut self) -> Result<BookingResult> {
        match self.run() {
            Ok(result) if result.driver.is_none() => {
                self.dispatch.counters().record_unserved();
                Ok(result)
            }
            Ok(result) => {
                self.state = BookingState::Completed;
                self.dispatch.counters().record_completed();
                Ok(result)
            }
            Err(err) => {
                self.state = BookingState::Aborted;
                self.dispatch.counters().record_aborted();
                self.log(&format!("Aborted: {err}"));
                Err(err)
            }
        }
    }

    fn run(&mut self) -> Result<BookingResult> {
        if self.dispatch.cancellation().is_cancelled() {
            self.dispatch.withdraw_awaiting();
            return Err(Error::Cancelled);
        }

        self.state = BookingState::AwaitingDriver;
        self.log("Starting booking, getting driver");
        let Some(mut lease) = self.acquire_driver()? else {
            self.state = BookingState::Unserved;
            self.log("No drivers left, region shut down");
            return Ok(BookingResult {
                booking_id: self.id,
                driver: None,
                passenger: Some(self.passenger.clone()),
                trip_duration: Duration::ZERO,
                elapsed: self.created_at.elapsed(),
            });
        };
        self.driver = Some(lease.driver.name().to_owned());

        let cancel = self.dispatch.cancellation().clone();

        self.state = BookingState::PickingUp;
        self.log("Starting, on way to passenger");
        lease
            .driver
            .pick_up_passenger(self.passenger.clone(), &cancel)?;

        self.state = BookingState::Travelling;
        self.log("Collected passenger, on way to destination");
        lease.driver.drive_to_destination(&cancel)?;

        let trip_duration = lease.driver.trip_travel_time();
        let driver = lease.driver.clone();
        // Dropping the lease puts the driver back in the idle pool.
        drop(lease);
        self.log("At destination, driver is now free");

        Ok(BookingResult {
            booking_id: self.id,
            driver: Some(driver),
            passenger: Some(self.passenger.clone()),
            trip_duration,
            elapsed: self.created_at.elapsed(),
        })
    }

    fn log(&self, message: &str) {
        self.dispatch.log_event(self, message);
    }

    /// Probes dispatch until a driver is handed over.
    ///
    /// Misses first spin and yield, then park on the dispatch's availability
    /// signal so a driver freed by any region wakes every waiting booking.
    /// Returns `None`, withdrawn from the waitlist, once the region is shut
    /// down and no driver is idle or on a trip.
    fn acquire_driver(&self) -> Result<Option<DriverLease>> {
        let backoff = Backoff::new();
        loop {
            if self.dispatch.cancellation().is_cancelled() {
                self.dispatch.withdraw_awaiting();
                return Err(Error::Cancelled);
            }
            let seen = self.dispatch.driver_generation();
            if let Some(driver) = self.dispatch.lease_driver() {
                tracing::trace!(booking = %self.id, driver = %driver.name(), "driver assigned");
                return Ok(Some(DriverLease {
                    dispatch: self.dispatch.clone(),
                    driver,
                }));
            }
            if self.region_closed() && self.dispatch.drivers_exhausted() {
                self.dispatch.withdraw_awaiting();
                tracing::debug!(booking = %self.id, region = %self.region, "no driver left to wait for");
                return Ok(None);
            }
            if backoff.is_completed() {
                self.dispatch.wait_for_driver(seen, DRIVER_POLL_INTERVAL);
            } else {
                backoff.snooze();
            }
        }
    }

    fn region_closed(&self) -> bool {
        self.dispatch
            .region(&self.region)
            .is_none_or(Region::is_shutdown)
    }
}

impl fmt::Display for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ID {} : {} : {}",
            self.id,
            self.driver.as_deref().unwrap_or("null"),
            self.passenger.name()
        )
    }
}

impl fmt::Debug for Booking {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Booking")
            .field("id", &self.id)
            .field("region", &self.region)
            .field("passenger", &self.passenger.name())
            .field("driver", &self.driver)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// A driver on loan from the idle pool.
///
/// Dropping the lease returns the driver to dispatch, which keeps the pool
/// whole when a trip is cut short by cancellation or a panic.
struct DriverLease {
    dispatch: Dispatch,
    driver: Driver,
}

impl Drop for DriverLease {
    fn drop(&mut self) {
        let mut driver = self.driver.clone();
        driver.drop_off();
        self.dispatch.release_driver(driver);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedDuration;
    use std::sync::Arc;

    fn dispatch() -> Dispatch {
        Dispatch::new([("north", 1)], false).unwrap()
    }

    #[test]
    fn renders_null_driver_before_assignment() {
        let dispatch = dispatch();
        let passenger = Passenger::new("Alice", Duration::ZERO);
        let booking = Booking::new(dispatch.clone(), "north", passenger);
        assert_eq!(booking.to_string(), format!("ID {} : null : Alice", booking.id()));
        assert_eq!(booking.state(), BookingState::Created);
        assert_eq!(booking.driver_name(), None);
        dispatch.shutdown();
    }

    #[test]
    fn executes_full_trip_and_frees_driver() {
        let dispatch = dispatch();
        let source = Arc::new(FixedDuration::from_millis(2));
        dispatch.add_driver(Driver::with_source("Dana", Duration::from_secs(1), source.clone()));
        let passenger = Passenger::with_source("Bob", Duration::from_secs(1), source);

        // Account for the booking as a region would on admission.
        let booking = Booking::new(dispatch.clone(), "north", passenger);
        let id = booking.id();
        dispatch.booking_accepted();

        let result = booking.execute().unwrap();
        assert_eq!(result.booking_id, id);
        assert_eq!(result.driver.as_ref().map(Driver::name), Some("Dana"));
        assert_eq!(result.passenger.as_ref().map(Passenger::name), Some("Bob"));
        assert_eq!(result.trip_duration, Duration::from_millis(4));
        assert!(result.elapsed >= result.trip_duration);

        assert_eq!(dispatch.idle_drivers(), 1);
        assert_eq!(dispatch.bookings_awaiting_driver(), 0);
        let stats = dispatch.stats();
        assert_eq!(stats.drivers_assigned, 1);
        assert_eq!(stats.drivers_released, 1);
        assert_eq!(stats.completed, 1);
        dispatch.shutdown();
    }

    #[test]
    fn cancelled_before_start_withdraws_from_waitlist() {
        let dispatch = dispatch();
        let passenger = Passenger::new("Carol", Duration::ZERO);
        let booking = Booking::new(dispatch.clone(), "north", passenger);
        dispatch.booking_accepted();
        assert_eq!(dispatch.bookings_awaiting_driver(), 1);

        dispatch.abort();
        assert_eq!(booking.execute().unwrap_err(), Error::Cancelled);
        assert_eq!(dispatch.bookings_awaiting_driver(), 0);
        assert_eq!(dispatch.stats().aborted, 1);
    }

    #[test]
    fn shut_down_region_without_drivers_goes_unserved() {
        let dispatch = dispatch();
        let passenger = Passenger::new("Erin", Duration::ZERO);
        let booking = Booking::new(dispatch.clone(), "north", passenger);
        dispatch.booking_accepted();
        dispatch.shutdown();

        let result = booking.execute().unwrap();
        assert!(result.driver.is_none());
        assert_eq!(result.passenger.as_ref().map(Passenger::name), Some("Erin"));
        assert_eq!(result.trip_duration, Duration::ZERO);
        assert_eq!(dispatch.bookings_awaiting_driver(), 0);
        let stats = dispatch.stats();
        assert_eq!(stats.unserved, 1);
        assert_eq!(stats.completed, 0);
    }
}
