//! Error types for the dispatch core.
//!
//! Admission failures (`UnknownRegion`, `RegionShutdown`) are recoverable and
//! returned straight to the caller of `book_passenger`. `Cancelled` and
//! `Abandoned` only ever surface through a [`BookingHandle`] and affect a
//! single booking.
//!
//! [`BookingHandle`]: crate::BookingHandle

use crate::BookingId;

/// A result type defaulting to the crate [`Error`].
pub type Result<T, E = Error> = core::result::Result<T, E>;

/// All errors the dispatch core can produce.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// No region with this name was registered with the dispatch.
    #[error("no region named `{region}`")]
    UnknownRegion { region: String },

    /// The region has been shut down and no longer admits bookings.
    #[error("region `{region}` is shutting down")]
    RegionShutdown { region: String },

    /// A simulated wait was interrupted because the simulation was aborted.
    #[error("simulation cancelled")]
    Cancelled,

    /// The executing side went away without producing an outcome.
    #[error("booking {booking} was dropped before producing a result")]
    Abandoned { booking: BookingId },

    /// A driver was asked to drive without having picked anyone up.
    #[error("driver `{driver}` has no passenger on board")]
    NoPassenger { driver: String },

    /// The dispatch configuration was rejected.
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The OS refused to start a slot thread for a region.
    #[error("failed to start worker for region `{region}`: {reason}")]
    WorkerSpawn { region: String, reason: String },
}
