//! Error types for the Linux backend

use thiserror::Error;

/// Linux spidev and GPIO errors
#[derive(Debug, Error)]
pub enum LinuxSpiError {
    /// Failed to open device
    #[error("Failed to open {path}: {source}")]
    OpenFailed {
        /// Device path
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to set SPI mode
    #[error("Failed to set SPI mode to 0x{mode:02x}: {source}")]
    SetModeFailed {
        /// Requested mode bits
        mode: u8,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to set bits per word
    #[error("Failed to set bits per word to {bits}: {source}")]
    SetBitsPerWordFailed {
        /// Requested word size
        bits: u8,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Failed to set clock speed
    #[error("Failed to set clock speed to {speed} Hz: {source}")]
    SetSpeedFailed {
        /// Requested speed
        speed: u32,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// SPI transfer failed
    #[error("SPI transfer failed: {0}")]
    TransferFailed(#[source] std::io::Error),

    /// Transfer not made of whole 16-bit words
    #[error("Transfer of {0} bytes is not a whole number of 16-bit words")]
    OddLength(usize),

    /// Failed to request GPIO lines
    #[error("Failed to request GPIO line {line} on '{chip}': {source}")]
    LineRequestFailed {
        /// GPIO chip path
        chip: String,
        /// Line offset
        line: u32,
        /// Underlying error
        #[source]
        source: gpiocdev::Error,
    },

    /// Failed to set GPIO line value
    #[error("Failed to set GPIO line value: {0}")]
    SetValueFailed(#[source] gpiocdev::Error),

    /// Failed to start the interrupt watcher thread
    #[error("Failed to start interrupt watcher: {0}")]
    WatcherSpawnFailed(#[source] std::io::Error),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Device not specified
    #[error("No device specified. Use dev=/dev/spidevX.Y")]
    NoDevice,
}

/// Result type for Linux backend operations
pub type Result<T> = std::result::Result<T, LinuxSpiError>;

impl From<LinuxSpiError> for libertas_spi_core::Error {
    fn from(e: LinuxSpiError) -> Self {
        libertas_spi_core::Error::bus(e)
    }
}
