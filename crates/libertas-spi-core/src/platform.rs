//! Board integration
//!
//! A board provides the SPI bus, the chip-select GPIO and the interrupt line
//! for one card, plus optional setup and teardown hooks (power, reset).

use crate::bus::{ChipSelect, SpiBus};
use crate::error::Result;
use crate::irq::InterruptBridge;

/// Per-board configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlatformData {
    /// GPIO number of the chip-select line
    pub gpio_cs: u32,
    /// Settle reads with dummy writes instead of timed waits
    pub use_dummy_writes: bool,
}

/// Resources of one SPI-attached card
///
/// `Irq` is the live interrupt binding: while it exists every interrupt edge
/// must reach [`InterruptBridge::on_interrupt`], and dropping it must stop
/// delivery before returning.
pub trait SpiDevice {
    /// SPI bus type
    type Bus: SpiBus + 'static;
    /// Chip-select line type
    type Cs: ChipSelect + 'static;
    /// Interrupt binding
    type Irq;

    /// Board description used in log messages
    fn name(&self) -> &str;

    /// Board configuration, if any was supplied
    fn platform_data(&self) -> Option<&PlatformData>;

    /// Board hook run first during attach
    fn setup(&mut self) -> Result<()> {
        Ok(())
    }

    /// Board hook run last during detach
    fn teardown(&mut self) {}

    /// Open the SPI bus
    fn open_bus(&mut self) -> Result<Self::Bus>;

    /// Claim the chip-select line, driven to its idle level
    fn request_chip_select(&mut self, gpio: u32) -> Result<Self::Cs>;

    /// Route interrupt edges to `bridge` until the binding is dropped
    fn request_irq(&mut self, bridge: InterruptBridge) -> Result<Self::Irq>;
}
