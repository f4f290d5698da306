//! libertas-spi-core - SPI link layer for Marvell libertas (gspi) WLAN modules
//!
//! This crate implements the host side of the SPI transport used by the
//! 8385 and 8686 chips: timed register transactions, the two-stage firmware
//! download, the outbound command and data queues, the worker that services
//! card interrupts, and the attach/detach sequence that ties them together.
//!
//! Hardware access goes through small traits ([`SpiBus`], [`ChipSelect`],
//! [`SpiDevice`]) so the same core runs on Linux spidev or on the in-memory
//! emulator. The network stack above the link is reached through
//! [`NetStack`] and [`Upcalls`].
//!
//! # Example
//!
//! ```ignore
//! use libertas_spi_core::{Card, DirFirmware, SpuTiming};
//!
//! let card = Card::attach(board, net, &DirFirmware::default(), SpuTiming::default())?;
//! card.submitter().submit(Direction::Command, &cmd)?;
//! // ...
//! card.detach();
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod bootstrap;
pub mod bus;
pub mod card;
pub mod chip;
pub mod error;
pub mod firmware;
pub mod host;
pub mod irq;
pub mod platform;
pub mod queue;
pub mod regs;
pub mod signal;
pub mod spu;
pub mod worker;

#[cfg(test)]
mod testutil;

pub use bus::{ChipSelect, SpiBus};
pub use card::{probe, Card, CardInfo};
pub use chip::{ChipModel, FirmwareNames};
pub use error::{BackendError, Error, ErrorKind, Result};
pub use firmware::{DirFirmware, FirmwareProvider, LoadProgress, NoProgress, Stage};
pub use host::{NetDevice, NetStack, Upcalls};
pub use irq::InterruptBridge;
pub use platform::{PlatformData, SpiDevice};
pub use queue::{Direction, Submitter};
pub use spu::{Spu, SpuTiming};
pub use worker::WorkerState;
