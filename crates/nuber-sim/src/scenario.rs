use crate::config::SimConfig;
use anyhow::{Context, bail};
use core::time::Duration;
use nuber::{Dispatch, DispatchConfig, DispatchStats, Driver, Error, Passenger};
use std::time::Instant;

/// How long slots get to wind down once the run is aborted.
const ABORT_GRACE: Duration = Duration::from_secs(5);

/// Outcome of one simulated run.
#[derive(Debug, Clone)]
pub struct Summary {
    pub completed: usize,
    /// Bookings that ended without a driver because none was left.
    pub unserved: usize,
    pub failed: usize,
    /// Whether the dispatch had to be aborted because bookings outlived the
    /// shutdown timeout.
    pub aborted: bool,
    pub stats: DispatchStats,
    pub idle_drivers: usize,
    pub awaiting: usize,
    /// Region name and its peak number of simultaneous bookings.
    pub peaks: Vec<(String, usize)>,
    pub longest_trip: Duration,
    pub elapsed: Duration,
}

impl Summary {
    pub fn log(&self) {
        tracing::info!(
            completed = self.completed,
            unserved = self.unserved,
            failed = self.failed,
            aborted = self.aborted,
            idle_drivers = self.idle_drivers,
            awaiting = self.awaiting,
            longest_trip = ?self.longest_trip,
            elapsed = ?self.elapsed,
            "simulation finished"
        );
        for (region, peak) in &self.peaks {
            tracing::info!(region = %region, peak, "region peak activity");
        }
        tracing::info!("{:?}", self.stats);
    }
}

/// Runs the configured scenario to completion.
///
/// Drivers are added first, then passengers are booked round-robin over the
/// regions in the order they were configured. After dispatch shuts down a
/// final booking is attempted and must be rejected. Admitted bookings get
/// `shutdown_timeout` to finish before the run is aborted.
pub fn run(config: &SimConfig) -> anyhow::Result<Summary> {
    let start = Instant::now();
    let dispatch = Dispatch::from_config(
        DispatchConfig::new()
            .regions(config.regions.iter().map(|(name, cap)| (name.as_str(), *cap)))
            .log_events(config.log_events)
            .idle_capacity(config.idle_capacity),
    )
    .context("failed to start dispatch")?;

    for i in 0..config.drivers {
        dispatch.add_driver(Driver::new(format!("D-{i}"), config.max_pickup_delay));
    }

    let handles = (0..config.passengers)
        .map(|i| {
            let (region, _) = &config.regions[i % config.regions.len()];
            let passenger = Passenger::new(format!("P-{i}"), config.max_travel_time);
            dispatch
                .book_passenger(passenger, region)
                .with_context(|| format!("failed to book passenger {i} in {region}"))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;
    tracing::info!(
        bookings = handles.len(),
        awaiting = dispatch.bookings_awaiting_driver(),
        "all passengers booked"
    );

    dispatch.shutdown();

    let (late_region, _) = &config.regions[0];
    match dispatch.book_passenger(Passenger::new("Late", config.max_travel_time), late_region) {
        Err(Error::RegionShutdown { .. }) => {
            tracing::info!(region = %late_region, "late booking rejected after shutdown");
        }
        Err(e) => bail!("late booking failed unexpectedly: {e}"),
        Ok(handle) => bail!("booking {} was admitted after shutdown", handle.id()),
    }

    let aborted = !dispatch.await_termination(config.shutdown_timeout);
    if aborted {
        tracing::warn!(
            timeout = ?config.shutdown_timeout,
            "bookings still running after shutdown timeout, aborting"
        );
        dispatch.abort();
        if !dispatch.await_termination(ABORT_GRACE) {
            bail!("region slots did not stop after abort");
        }
    }

    let mut completed = 0;
    let mut unserved = 0;
    let mut failed = 0;
    let mut longest_trip = Duration::ZERO;
    for handle in &handles {
        match handle.wait() {
            Ok(result) if result.driver.is_none() => {
                unserved += 1;
                tracing::warn!(booking = %handle.id(), "booking went unserved");
            }
            Ok(result) => {
                completed += 1;
                longest_trip = longest_trip.max(result.trip_duration);
            }
            Err(e) => {
                failed += 1;
                tracing::warn!(booking = %handle.id(), error = %e, "booking did not complete");
            }
        }
    }

    let peaks = dispatch
        .region_names()
        .into_iter()
        .filter_map(|name| {
            dispatch
                .region(name)
                .map(|region| (name.to_owned(), region.peak_active()))
        })
        .collect();

    Ok(Summary {
        completed,
        unserved,
        failed,
        aborted,
        stats: dispatch.stats(),
        idle_drivers: dispatch.idle_drivers(),
        awaiting: dispatch.bookings_awaiting_driver(),
        peaks,
        longest_trip,
        elapsed: start.elapsed(),
    })
}
