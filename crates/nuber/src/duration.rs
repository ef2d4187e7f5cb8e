use core::time::Duration;
use rand::{Rng, rng};

/// A source of simulated delays.
///
/// Drivers draw their pickup delay from one and passengers their travel time.
/// This abstraction allows you to plug in a random source for simulations or
/// a fixed one in tests.
///
/// Implementations must return a value within `[min, max]`. When `max` is
/// below `min`, `min` is returned.
///
/// # Example
///
/// ```
/// use core::time::Duration;
/// use nuber::DurationSource;
///
/// struct Slowest;
/// impl DurationSource for Slowest {
///     fn next(&self, _min: Duration, max: Duration) -> Duration {
///         max
///     }
/// }
///
/// let source = Slowest;
/// assert_eq!(
///     source.next(Duration::ZERO, Duration::from_millis(40)),
///     Duration::from_millis(40)
/// );
/// ```
pub trait DurationSource: Send + Sync {
    /// Returns a delay within `[min, max]`.
    fn next(&self, min: Duration, max: Duration) -> Duration;
}

/// A `DurationSource` drawing uniformly at millisecond granularity from the
/// thread-local RNG (`rand::rng()`).
///
/// The type is zero-sized and does not store the RNG; every call goes to the
/// calling thread's generator, so slots in different regions never contend.
#[derive(Default, Clone, Copy, Debug)]
pub struct UniformDuration;

impl DurationSource for UniformDuration {
    fn next(&self, min: Duration, max: Duration) -> Duration {
        let lo = millis(min);
        let hi = millis(max);
        if hi <= lo {
            return Duration::from_millis(lo);
        }
        Duration::from_millis(rng().random_range(lo..=hi))
    }
}

/// A `DurationSource` that always yields the same delay, clamped to the
/// requested bounds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FixedDuration(pub Duration);

impl FixedDuration {
    /// A source that never waits.
    pub const ZERO: Self = Self(Duration::ZERO);

    pub const fn from_millis(millis: u64) -> Self {
        Self(Duration::from_millis(millis))
    }
}

impl DurationSource for FixedDuration {
    fn next(&self, min: Duration, max: Duration) -> Duration {
        if max <= min {
            return min;
        }
        self.0.clamp(min, max)
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
