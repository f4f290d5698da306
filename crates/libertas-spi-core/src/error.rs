//! Error types for libertas-spi-core

use thiserror::Error;

/// Boxed error returned by bus, chip-select and interrupt backends
pub type BackendError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse classification of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// A bus transaction failed or the device misbehaved at the I/O level
    Io,
    /// A wait-for helper ran out of budget
    Timeout,
    /// The device asked for or sent something outside the protocol limits
    ProtocolViolation,
    /// A buffer could not be allocated
    OutOfMemory,
    /// Unknown chip or missing platform configuration
    Unsupported,
    /// The caller passed an argument the transport cannot accept
    InvalidArgument,
    /// A firmware image could not be found
    NotFound,
}

/// Errors produced by the SPI link core
#[derive(Debug, Error)]
pub enum Error {
    /// The SPI bus, chip-select line or another backend resource failed
    #[error("bus transfer failed: {0}")]
    Bus(#[source] BackendError),

    /// An I/O level failure detected by the protocol itself
    #[error("I/O error: {0}")]
    Io(String),

    /// A register did not reach the expected value in time
    #[error("timed out waiting for register 0x{reg:02x}")]
    Timeout {
        /// Register that was being polled
        reg: u16,
    },

    /// The device requested or reported something outside protocol limits
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// Allocation of a transfer buffer failed
    #[error("out of memory")]
    OutOfMemory,

    /// The chip id read from the device has no entry in the identity table
    #[error("unsupported chip id 0x{0:02x}")]
    UnsupportedChip(u16),

    /// The device was attached without platform configuration
    #[error("no platform configuration supplied")]
    NoPlatformData,

    /// Invalid argument passed to the transport
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// A firmware image could not be loaded from the provider
    #[error("firmware image '{name}' not found")]
    FirmwareNotFound {
        /// Image name as requested by the bootstrap
        name: String,
        /// Underlying lookup failure, if any
        #[source]
        source: Option<std::io::Error>,
    },

    /// The link worker thread could not be created
    #[error("failed to start link worker: {0}")]
    WorkerSpawn(#[source] std::io::Error),

    /// The card has been detached and no longer takes transfers
    #[error("card detached")]
    Detached,
}

impl Error {
    /// Wrap a backend error
    pub fn bus<E>(err: E) -> Self
    where
        E: Into<BackendError>,
    {
        Self::Bus(err.into())
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Bus(_) | Self::Io(_) | Self::WorkerSpawn(_) | Self::Detached => ErrorKind::Io,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Self::OutOfMemory => ErrorKind::OutOfMemory,
            Self::UnsupportedChip(_) | Self::NoPlatformData => ErrorKind::Unsupported,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::FirmwareNotFound { .. } => ErrorKind::NotFound,
        }
    }

    /// Negative status code reported to whoever invoked the attach
    ///
    /// Values follow the Linux errno numbering so that a failed probe looks
    /// the same to scripts as it would from the kernel driver.
    pub fn errno(&self) -> i32 {
        match self {
            Self::Bus(_) | Self::Io(_) | Self::ProtocolViolation(_) => -5, // EIO
            Self::WorkerSpawn(_) => -11,                                   // EAGAIN
            Self::Detached => -19,                                         // ENODEV
            Self::Timeout { .. } => -110,                                  // ETIMEDOUT
            Self::OutOfMemory => -12,                                      // ENOMEM
            Self::UnsupportedChip(_) => -97,                               // EAFNOSUPPORT
            Self::NoPlatformData | Self::InvalidArgument(_) => -22,        // EINVAL
            Self::FirmwareNotFound { .. } => -2,                           // ENOENT
        }
    }
}

/// Result type alias using the core Error type
pub type Result<T> = std::result::Result<T, Error>;
