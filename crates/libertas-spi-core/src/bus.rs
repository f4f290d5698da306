//! Bus-level traits
//!
//! The SPU speaks in 16-bit words over a half-duplex bus. A transaction is one
//! chip-select assertion covering a register word, an optional settle phase
//! and the payload. Backends only have to move bytes; the word layout,
//! timing and chip-select sequencing live in [`crate::spu`].

use crate::error::Result;

/// Half-duplex SPI bus
///
/// Implementations must keep the bus clocked in 16-bit words and must not
/// touch chip-select themselves; the transaction unit drives it through
/// [`ChipSelect`] so that one assertion can span several calls.
pub trait SpiBus: Send {
    /// Clock out `data`, discarding whatever the device drives back
    fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Clock in `buf.len()` bytes
    fn read(&mut self, buf: &mut [u8]) -> Result<()>;

    /// Sleep for at least `us` microseconds
    ///
    /// Used by the polling helpers between register reads. The default sleeps
    /// the calling thread.
    fn delay_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us as u64));
    }
}

/// Chip-select line of the SPU
pub trait ChipSelect: Send {
    /// Drive the line to its asserted (`true`) or idle (`false`) level
    fn set(&mut self, active: bool) -> Result<()>;
}

impl<T: SpiBus + ?Sized> SpiBus for Box<T> {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        (**self).write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        (**self).read(buf)
    }

    fn delay_us(&mut self, us: u32) {
        (**self).delay_us(us)
    }
}

impl<T: ChipSelect + ?Sized> ChipSelect for Box<T> {
    fn set(&mut self, active: bool) -> Result<()> {
        (**self).set(active)
    }
}
