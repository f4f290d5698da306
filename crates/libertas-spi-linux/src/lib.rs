//! libertas-spi-linux - Linux spidev and GPIO backend
//!
//! This crate connects a libertas gspi card wired to a Linux SPI controller:
//! the bus goes through `/dev/spidevX.Y`, while chip-select, the interrupt
//! line and an optional reset line are GPIOs on a `/dev/gpiochipN` device.
//!
//! # Example
//!
//! ```no_run
//! use libertas_spi_linux::{parse_options, LinuxBoard};
//!
//! let config = parse_options(&[
//!     ("dev", "/dev/spidev0.0"),
//!     ("cs", "8"),
//!     ("irq", "25"),
//! ])?;
//! let board = LinuxBoard::new(config);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! # Usage with the libertas-spi CLI
//!
//! ```bash
//! # Identify the card without loading firmware
//! libertas-spi probe -b linux_spi:dev=/dev/spidev0.0,cs=8,irq=25
//!
//! # Bring the link up, firmware from /lib/firmware
//! libertas-spi attach -b linux_spi:dev=/dev/spidev0.0,cs=8,irq=25,reset=24
//! ```
//!
//! # System Requirements
//!
//! - Linux kernel with spidev support enabled (`CONFIG_SPI_SPIDEV`)
//! - A controller that supports 16 bits per word and `SPI_NO_CS`
//! - Read/write access to `/dev/spidevX.Y` and `/dev/gpiochipN`

#![warn(missing_docs)]

pub mod board;
pub mod error;
pub mod gpio;
pub mod spi;

pub use board::{parse_options, LinuxBoard, LinuxBoardConfig};
pub use error::{LinuxSpiError, Result};
pub use gpio::{GpioChipSelect, GpioInterrupt, GpioReset};
pub use spi::{mode, LinuxSpiBus, LinuxSpiConfig};
