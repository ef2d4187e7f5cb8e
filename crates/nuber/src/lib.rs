//! Concurrent core of a ride-dispatch simulation.
//!
//! A [`Dispatch`] owns a set of named [`Region`]s and one shared pool of idle
//! [`Driver`]s. Each region runs at most a fixed number of [`Booking`]s at a
//! time; every booking waits for an idle driver, simulates the pickup and the
//! trip, then returns the driver to the pool.

mod booking;
mod cancel;
mod dispatch;
mod duration;
mod error;
mod handle;
mod id;
mod person;
mod pool;
mod region;
#[cfg(test)]
mod tests;

pub use crate::booking::*;
pub use crate::cancel::*;
pub use crate::dispatch::{Dispatch, DispatchConfig, DispatchStats};
pub use crate::duration::*;
pub use crate::error::*;
pub use crate::handle::BookingHandle;
pub use crate::id::*;
pub use crate::person::*;
pub use crate::pool::DEFAULT_IDLE_CAPACITY;
pub use crate::region::*;
