use crate::{
    BookingHandle, BookingId, BookingIdGenerator, Dispatch, DispatchConfig, Driver,
    DurationSource, Error, FixedDuration, Passenger,
};
use core::time::Duration;
use std::collections::HashSet;
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, scope};
use std::time::Instant;

const TERMINATION: Duration = Duration::from_secs(10);

fn fixed(millis: u64) -> Arc<dyn DurationSource> {
    Arc::new(FixedDuration::from_millis(millis))
}

fn driver(name: &str, pickup_ms: u64) -> Driver {
    Driver::with_source(name, Duration::from_secs(60), fixed(pickup_ms))
}

fn passenger(name: &str, travel_ms: u64) -> Passenger {
    Passenger::with_source(name, Duration::from_secs(60), fixed(travel_ms))
}

/// A dispatch whose booking ids start at 1, unaffected by other tests.
fn isolated<I>(regions: I, log_events: bool) -> Dispatch
where
    I: IntoIterator<Item = (&'static str, usize)>,
{
    let ids: &'static BookingIdGenerator = Box::leak(Box::new(BookingIdGenerator::new()));
    Dispatch::from_config(
        DispatchConfig::new()
            .regions(regions)
            .log_events(log_events)
            .id_generator(ids),
    )
    .unwrap()
}

fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(1));
    }
    condition()
}

struct Panicking;

impl DurationSource for Panicking {
    fn next(&self, _min: Duration, _max: Duration) -> Duration {
        panic!("travel time unavailable");
    }
}

#[test]
fn concurrent_bookings_get_unique_dense_ids() {
    let dispatch = isolated([("east", 2), ("west", 2)], false);
    for i in 0..4 {
        dispatch.add_driver(driver(&format!("D{i}"), 0));
    }

    let threads = 8;
    let per_thread = 25;
    let barrier = Barrier::new(threads);
    let handles = Mutex::new(Vec::new());
    scope(|s| {
        for t in 0..threads {
            let dispatch = &dispatch;
            let barrier = &barrier;
            let handles = &handles;
            s.spawn(move || {
                barrier.wait();
                for i in 0..per_thread {
                    let region = if (t + i) % 2 == 0 { "east" } else { "west" };
                    let handle = dispatch
                        .book_passenger(passenger(&format!("P{t}-{i}"), 0), region)
                        .unwrap();
                    handles.lock().unwrap().push(handle);
                }
            });
        }
    });

    let handles = handles.into_inner().unwrap();
    let mut ids: Vec<u64> = handles.iter().map(|h| h.id().to_raw()).collect();
    ids.sort_unstable();
    let total = (threads * per_thread) as u64;
    assert_eq!(ids, (1..=total).collect::<Vec<_>>());

    dispatch.shutdown();
    assert!(dispatch.await_termination(TERMINATION));
    let results: HashSet<BookingId> = handles
        .iter()
        .map(|h| h.wait().unwrap().booking_id)
        .collect();
    assert_eq!(results.len() as u64, total);
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);
    assert_eq!(dispatch.idle_drivers(), 4);
}

#[test]
fn awaiting_count_tracks_admission_and_assignment() {
    let dispatch = Dispatch::new([("north", 2)], false).unwrap();
    let handles: Vec<BookingHandle> = (0..5)
        .map(|i| {
            dispatch
                .book_passenger(passenger(&format!("P{i}"), 400), "north")
                .unwrap()
        })
        .collect();
    assert_eq!(dispatch.bookings_awaiting_driver(), 5);

    dispatch.add_driver(driver("D", 0));
    assert!(eventually(Duration::from_secs(2), || {
        dispatch.bookings_awaiting_driver() == 4
    }));
    assert_eq!(dispatch.idle_drivers(), 0);

    dispatch.abort();
    assert!(dispatch.await_termination(TERMINATION));
    for handle in &handles {
        assert_eq!(handle.wait().unwrap_err(), Error::Cancelled);
    }
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);
    assert_eq!(dispatch.idle_drivers(), 1);

    let stats = dispatch.stats();
    assert_eq!(stats.accepted, 5);
    assert_eq!(stats.aborted, 5);
    assert_eq!(stats.drivers_assigned, stats.drivers_released);
}

#[test]
fn region_never_exceeds_its_slots() {
    let dispatch = Dispatch::new([("city", 2)], false).unwrap();
    for i in 0..6 {
        dispatch.add_driver(driver(&format!("D{i}"), 20));
    }

    let start = Instant::now();
    let handles: Vec<_> = (0..6)
        .map(|i| {
            dispatch
                .book_passenger(passenger(&format!("P{i}"), 20), "city")
                .unwrap()
        })
        .collect();
    for handle in &handles {
        assert_eq!(handle.wait().unwrap().trip_duration, Duration::from_millis(40));
    }

    // Six 40ms trips through two slots take at least three rounds.
    assert!(start.elapsed() >= Duration::from_millis(120));
    let region = dispatch.region("city").unwrap();
    assert!(region.peak_active() <= 2);
    assert_eq!(region.active_bookings(), 0);
    assert_eq!(region.completed_bookings(), 6);
    dispatch.shutdown();
}

#[test]
fn drivers_are_conserved_across_regions() {
    let dispatch = Dispatch::new([("a", 3), ("b", 2), ("c", 1)], false).unwrap();
    for i in 0..3 {
        dispatch.add_driver(Driver::new(format!("D{i}"), Duration::from_millis(3)));
    }

    let regions = ["a", "b", "c"];
    let handles: Vec<_> = (0..30)
        .map(|i| {
            let p = Passenger::new(format!("P{i}"), Duration::from_millis(3));
            dispatch.book_passenger(p, regions[i % 3]).unwrap()
        })
        .collect();
    dispatch.shutdown();
    assert!(dispatch.await_termination(TERMINATION));

    for handle in &handles {
        let result = handle.wait().unwrap();
        assert!(result.trip_duration <= Duration::from_millis(6));
        assert!(result.driver.as_ref().is_some_and(|d| d.current_passenger().is_some()));
    }
    let stats = dispatch.stats();
    assert_eq!(stats.completed, 30);
    assert_eq!(stats.drivers_assigned, 30);
    assert_eq!(stats.drivers_released, 30);
    assert_eq!(dispatch.idle_drivers(), 3);
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);
}

#[test]
fn shut_down_region_rejects_and_rolls_back_id() {
    let dispatch = isolated([("closed", 1), ("open", 1)], false);
    dispatch.region("closed").unwrap().shutdown();

    let err = dispatch
        .book_passenger(passenger("P1", 0), "closed")
        .unwrap_err();
    assert_eq!(
        err,
        Error::RegionShutdown {
            region: "closed".into()
        }
    );
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);
    assert_eq!(dispatch.stats().rejected, 1);

    let handle = dispatch.book_passenger(passenger("P2", 0), "open").unwrap();
    assert_eq!(handle.id(), BookingId::from_raw(1));
    assert_eq!(dispatch.bookings_awaiting_driver(), 1);

    dispatch.abort();
    assert_eq!(handle.wait().unwrap_err(), Error::Cancelled);
    assert!(dispatch.await_termination(TERMINATION));
}

#[test]
fn unknown_region_consumes_nothing() {
    let dispatch = isolated([("north", 1)], false);
    let err = dispatch
        .book_passenger(passenger("P1", 0), "atlantis")
        .unwrap_err();
    assert_eq!(
        err,
        Error::UnknownRegion {
            region: "atlantis".into()
        }
    );
    assert_eq!(dispatch.stats().rejected, 0);

    dispatch.add_driver(driver("D", 0));
    let handle = dispatch.book_passenger(passenger("P2", 0), "north").unwrap();
    assert_eq!(handle.id(), BookingId::from_raw(1));
    assert!(handle.wait().is_ok());
    dispatch.shutdown();
}

#[test]
fn single_slot_region_serves_one_at_a_time() {
    let dispatch = isolated([("Primary", 10), ("Rural", 1)], true);
    dispatch.add_driver(driver("D", 10));

    let first = dispatch.book_passenger(passenger("P1", 10), "Rural").unwrap();
    let second = dispatch.book_passenger(passenger("P2", 10), "Rural").unwrap();
    dispatch.shutdown();

    let first = first.wait().unwrap();
    let second = second.wait().unwrap();
    assert_eq!(first.booking_id, BookingId::from_raw(1));
    assert_eq!(second.booking_id, BookingId::from_raw(2));
    for result in [&first, &second] {
        assert_eq!(result.driver.as_ref().map(Driver::name), Some("D"));
        assert_eq!(result.trip_duration, Duration::from_millis(20));
    }
    assert_eq!(dispatch.region("Rural").unwrap().peak_active(), 1);
    assert!(dispatch.await_termination(TERMINATION));
}

#[test]
fn default_dispatches_never_reuse_ids() {
    let first = Dispatch::new([("north", 1)], false).unwrap();
    let second = Dispatch::new([("north", 1)], false).unwrap();
    first.add_driver(driver("D1", 0));
    second.add_driver(driver("D2", 0));

    let a = first.book_passenger(passenger("P1", 0), "north").unwrap();
    let b = second.book_passenger(passenger("P2", 0), "north").unwrap();
    assert!(a.id() < b.id());
    assert_eq!(a.wait().unwrap().booking_id, a.id());
    assert_eq!(b.wait().unwrap().booking_id, b.id());

    first.shutdown();
    second.shutdown();
    assert!(first.await_termination(TERMINATION));
    assert!(second.await_termination(TERMINATION));
}

#[test]
fn shutdown_without_drivers_leaves_bookings_unserved() {
    let dispatch = Dispatch::new([("rural", 1)], false).unwrap();
    let handle = dispatch.book_passenger(passenger("P1", 0), "rural").unwrap();
    assert_eq!(dispatch.bookings_awaiting_driver(), 1);

    dispatch.shutdown();
    assert!(dispatch.await_termination(Duration::from_secs(2)));

    let result = handle
        .wait_timeout(Duration::from_secs(1))
        .expect("booking resolved")
        .unwrap();
    assert!(result.driver.is_none());
    assert_eq!(result.passenger.as_ref().map(Passenger::name), Some("P1"));
    assert_eq!(result.trip_duration, Duration::ZERO);
    assert_eq!(dispatch.bookings_awaiting_driver(), 0);

    let stats = dispatch.stats();
    assert_eq!(stats.unserved, 1);
    assert_eq!(stats.completed, 0);
    assert_eq!(stats.drivers_assigned, 0);
}

#[test]
fn shutdown_keeps_waiting_while_a_driver_is_on_a_trip() {
    let dispatch = Dispatch::new([("city", 2)], false).unwrap();
    dispatch.add_driver(driver("D", 30));
    let first = dispatch.book_passenger(passenger("P1", 30), "city").unwrap();
    let second = dispatch.book_passenger(passenger("P2", 30), "city").unwrap();

    assert!(eventually(Duration::from_secs(2), || dispatch.idle_drivers() == 0));
    dispatch.shutdown();
    assert!(dispatch.await_termination(TERMINATION));

    for handle in [&first, &second] {
        let result = handle.wait().unwrap();
        assert_eq!(result.driver.as_ref().map(Driver::name), Some("D"));
    }
    let stats = dispatch.stats();
    assert_eq!(stats.completed, 2);
    assert_eq!(stats.unserved, 0);
}

#[test]
fn shutdown_drains_queued_bookings() {
    let dispatch = Dispatch::new([("north", 1)], false).unwrap();
    dispatch.add_driver(driver("D", 5));
    let handles: Vec<_> = (0..3)
        .map(|i| {
            dispatch
                .book_passenger(passenger(&format!("P{i}"), 5), "north")
                .unwrap()
        })
        .collect();
    dispatch.shutdown();
    assert!(dispatch.region("north").unwrap().is_shutdown());

    assert!(dispatch.await_termination(TERMINATION));
    for handle in &handles {
        assert!(handle.is_finished());
        assert!(handle.try_result().unwrap().is_ok());
    }
    assert_eq!(dispatch.stats().completed, 3);
}

#[test]
fn abort_mid_trip_returns_driver() {
    let dispatch = Dispatch::new([("north", 1)], false).unwrap();
    dispatch.add_driver(driver("D", 0));
    let handle = dispatch.book_passenger(passenger("P", 5_000), "north").unwrap();

    assert!(eventually(Duration::from_secs(2), || {
        dispatch.idle_drivers() == 0 && dispatch.bookings_awaiting_driver() == 0
    }));
    let start = Instant::now();
    dispatch.abort();

    assert!(matches!(
        handle.wait_timeout(Duration::from_secs(2)),
        Some(Err(Error::Cancelled))
    ));
    assert!(start.elapsed() < Duration::from_secs(2));
    assert!(dispatch.await_termination(TERMINATION));
    assert_eq!(dispatch.idle_drivers(), 1);

    let stats = dispatch.stats();
    assert_eq!(stats.aborted, 1);
    assert_eq!(stats.drivers_released, 1);
    assert!(dispatch.is_aborted());
}

#[test]
fn panicking_booking_is_abandoned_and_keeps_driver() {
    let dispatch = Dispatch::new([("north", 1)], false).unwrap();
    dispatch.add_driver(driver("D", 0));
    let broken = Passenger::with_source("P1", Duration::from_secs(1), Arc::new(Panicking));
    let handle = dispatch.book_passenger(broken, "north").unwrap();

    assert_eq!(
        handle.wait().unwrap_err(),
        Error::Abandoned {
            booking: handle.id()
        }
    );
    assert!(eventually(Duration::from_secs(1), || dispatch.idle_drivers() == 1));

    // The slot survives the panic and keeps serving bookings.
    let next = dispatch.book_passenger(passenger("P2", 0), "north").unwrap();
    assert_eq!(next.wait().unwrap().driver.map(|d| d.name().to_owned()), Some("D".into()));
    dispatch.shutdown();
    assert!(dispatch.await_termination(TERMINATION));
}
