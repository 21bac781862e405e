use std::num::ParseIntError;
use thiserror::Error;

/// Everything that can go wrong in the buffer, its config and its driver.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Underlying I/O failure, e.g. reading the config file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed packet data.
    #[error("invalid data: {0}")]
    InvalidData(String),

    /// Rejected option string or setting.
    #[error("invalid options: {0}")]
    InvalidOptions(String),

    /// Integer field in an option string or config file.
    #[error("parse int error: {0}")]
    ParseInt(#[from] ParseIntError),

    /// The burst did not fit even after growing to the configured maximum.
    #[error("buffer full; dropping {dropped} packets")]
    CapacityExceeded {
        /// Packets in the dropped burst
        dropped: usize,
    },

    /// Maximum size was reached without a valid reference clock ever being found.
    #[error("PCR absent or invalid; dropping {dropped} packets")]
    NoReferenceClock {
        /// Packets in the dropped burst
        dropped: usize,
    },

    /// The output channel receiver went away.
    #[error("channel closed")]
    ChannelClosed,
}

/// Result alias over [`SyncError`].
pub type Result<T> = std::result::Result<T, SyncError>;
