use crate::{CancellationToken, DurationSource, Error, Result, UniformDuration};
use core::{fmt, time::Duration};
use std::sync::Arc;

/// Identity and delay bound shared by drivers and passengers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub name: String,
    /// Upper bound of the delay this person contributes to a trip.
    pub max_delay: Duration,
}

impl Profile {
    pub fn new(name: impl Into<String>, max_delay: Duration) -> Self {
        Self {
            name: name.into(),
            max_delay,
        }
    }
}

/// Someone waiting to be driven somewhere. Read-only once created.
#[derive(Clone)]
pub struct Passenger {
    profile: Profile,
    source: Arc<dyn DurationSource>,
}

impl Passenger {
    /// Creates a passenger whose travel time is drawn uniformly from
    /// `[0, max_travel_time]`.
    pub fn new(name: impl Into<String>, max_travel_time: Duration) -> Self {
        Self::with_source(name, max_travel_time, Arc::new(UniformDuration))
    }

    pub fn with_source(
        name: impl Into<String>,
        max_travel_time: Duration,
        source: Arc<dyn DurationSource>,
    ) -> Self {
        Self {
            profile: Profile::new(name, max_travel_time),
            source,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn max_travel_time(&self) -> Duration {
        self.profile.max_delay
    }

    /// Draws the time needed to reach this passenger's destination.
    pub fn travel_time(&self) -> Duration {
        self.source.next(Duration::ZERO, self.profile.max_delay)
    }
}

impl fmt::Debug for Passenger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Passenger")
            .field("name", &self.profile.name)
            .field("max_travel_time", &self.profile.max_delay)
            .finish_non_exhaustive()
    }
}

/// A driver and the state of the trip it is currently on.
///
/// A driver lives for the whole run and moves between the dispatch's idle
/// pool and exactly one booking at a time. Clones are snapshots: the copy
/// handed out in a [`BookingResult`] does not track later trips.
///
/// [`BookingResult`]: crate::BookingResult
#[derive(Clone)]
pub struct Driver {
    profile: Profile,
    source: Arc<dyn DurationSource>,
    passenger: Option<Passenger>,
    trip_travel_time: Duration,
}

impl Driver {
    /// Creates a driver whose pickup delay is drawn uniformly from
    /// `[0, max_pickup_delay]`.
    pub fn new(name: impl Into<String>, max_pickup_delay: Duration) -> Self {
        Self::with_source(name, max_pickup_delay, Arc::new(UniformDuration))
    }

    pub fn with_source(
        name: impl Into<String>,
        max_pickup_delay: Duration,
        source: Arc<dyn DurationSource>,
    ) -> Self {
        Self {
            profile: Profile::new(name, max_pickup_delay),
            source,
            passenger: None,
            trip_travel_time: Duration::ZERO,
        }
    }

    pub fn name(&self) -> &str {
        &self.profile.name
    }

    pub fn max_pickup_delay(&self) -> Duration {
        self.profile.max_delay
    }

    pub fn current_passenger(&self) -> Option<&Passenger> {
        self.passenger.as_ref()
    }

    /// Pickup delay plus travel time of the most recent trip.
    pub fn trip_travel_time(&self) -> Duration {
        self.trip_travel_time
    }

    /// Takes `passenger` on board and waits out the pickup delay.
    ///
    /// The delay starts a new trip: it replaces whatever the previous trip
    /// accumulated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Cancelled`] if `cancel` fires during the wait. The
    /// passenger stays bound to the driver.
    pub fn pick_up_passenger(
        &mut self,
        passenger: Passenger,
        cancel: &CancellationToken,
    ) -> Result<Duration> {
        let delay = self.source.next(Duration::ZERO, self.profile.max_delay);
        tracing::trace!(
            driver = %self.profile.name,
            passenger = %passenger.name(),
            ?delay,
            "picking up"
        );
        self.passenger = Some(passenger);
        self.trip_travel_time = delay;
        cancel.sleep(delay)?;
        Ok(delay)
    }

    /// Drives the current passenger to their destination.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoPassenger`] when nobody was picked up, and
    /// [`Error::Cancelled`] if `cancel` fires during the trip.
    pub fn drive_to_destination(&mut self, cancel: &CancellationToken) -> Result<Duration> {
        let Some(passenger) = self.passenger.as_ref() else {
            return Err(Error::NoPassenger {
                driver: self.profile.name.clone(),
            });
        };
        let travel = passenger.travel_time();
        tracing::trace!(
            driver = %self.profile.name,
            passenger = %passenger.name(),
            ?travel,
            "driving"
        );
        cancel.sleep(travel)?;
        self.trip_travel_time += travel;
        Ok(travel)
    }

    /// Lets the current passenger out.
    pub fn drop_off(&mut self) -> Option<Passenger> {
        self.passenger.take()
    }
}

impl fmt::Debug for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("name", &self.profile.name)
            .field("max_pickup_delay", &self.profile.max_delay)
            .field("passenger", &self.passenger.as_ref().map(Passenger::name))
            .field("trip_travel_time", &self.trip_travel_time)
            .finish_non_exhaustive()
    }
}
