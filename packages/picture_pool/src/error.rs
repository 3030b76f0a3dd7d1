use thiserror::Error;

use crate::VideoFormat;

/// Errors that can occur when creating pictures or picture pools.
///
/// Running out of available pictures when leasing from an existing pool is not an error.
/// [`PicturePool::get()`][crate::PicturePool::get] signals that condition by returning `None`.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The pool was configured with more pictures than the availability mask can track.
    #[error("a picture pool can hold at most {max} pictures but {requested} were requested")]
    CapacityExceeded {
        /// How many pictures the caller tried to place in the pool.
        requested: usize,

        /// The maximum number of pictures a single pool can hold.
        max: usize,
    },

    /// The video format cannot be used to allocate a picture.
    #[error("invalid video format {format}: {problem}")]
    InvalidFormat {
        /// The format that was rejected.
        format: VideoFormat,

        /// A human-readable description of the problem.
        problem: String,
    },

    /// Memory for the pixel planes of a picture could not be allocated.
    #[error("failed to allocate {bytes} bytes of pixel memory")]
    Allocation {
        /// Size of the plane allocation that failed.
        bytes: usize,
    },

    /// A master pool did not have enough available pictures to satisfy a reservation.
    #[error("requested {requested} pictures from the master pool but only {obtained} were available")]
    Exhausted {
        /// How many pictures the reservation asked for.
        requested: usize,

        /// How many pictures were leased before the master pool ran dry.
        obtained: usize,
    },
}

/// A specialized `Result` type for picture pool operations, returning the crate's
/// [`Error`] type as the error value.
pub(crate) type Result<T> = std::result::Result<T, Error>;

/// Failure reported by a lock hook when it cannot prepare a picture for use.
///
/// The pool treats this as a local failure of one slot: the slot is skipped and the lease
/// continues with the next available slot.
#[derive(Debug, Error)]
#[error("failed to lock picture: {message}")]
pub struct HookError {
    message: String,
}

impl HookError {
    /// Creates a hook error with a human-readable description of what went wrong.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// The human-readable description of what went wrong.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}
