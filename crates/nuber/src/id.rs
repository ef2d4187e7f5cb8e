use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

/// Identifier of a single booking.
///
/// Ids start at 1 and are handed out in strictly increasing order by a
/// [`BookingIdGenerator`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BookingId(u64);

impl BookingId {
    /// Wraps a raw id value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id value.
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A lock-free, monotonically increasing booking id generator.
///
/// The last issued id lives in a single [`AtomicU64`], so any thread (any
/// region slot, any caller) may allocate concurrently. Every call to
/// [`Self::next_id`] returns a distinct id greater than every id returned
/// before it.
///
/// An id that was allocated but never used can be handed back with
/// [`Self::release`]. The rollback only succeeds while the id is still the
/// most recent one; otherwise it would collide with a later allocation, so
/// the gap is kept.
#[derive(Debug, Default)]
pub struct BookingIdGenerator {
    #[cfg(feature = "cache-padded")]
    last: crossbeam_utils::CachePadded<AtomicU64>,
    #[cfg(not(feature = "cache-padded"))]
    last: AtomicU64,
}

impl BookingIdGenerator {
    /// Creates a generator whose first id is 1.
    pub const fn new() -> Self {
        Self::from_last(0)
    }

    /// Creates a generator that continues after `last`.
    pub const fn from_last(last: u64) -> Self {
        Self {
            #[cfg(feature = "cache-padded")]
            last: crossbeam_utils::CachePadded::new(AtomicU64::new(last)),
            #[cfg(not(feature = "cache-padded"))]
            last: AtomicU64::new(last),
        }
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> BookingId {
        let previous = self.last.fetch_add(1, Ordering::AcqRel);
        debug_assert!(previous < u64::MAX, "booking id space exhausted");
        BookingId(previous + 1)
    }

    /// Hands an unused id back to the generator.
    ///
    /// Returns `true` if the id was rolled back and will be issued again, or
    /// `false` if a later id has already been allocated.
    pub fn release(&self, id: BookingId) -> bool {
        self.last
            .compare_exchange(id.0, id.0 - 1, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns the most recently issued id, if any.
    pub fn last_issued(&self) -> Option<BookingId> {
        match self.last.load(Ordering::Acquire) {
            0 => None,
            raw => Some(BookingId(raw)),
        }
    }
}
