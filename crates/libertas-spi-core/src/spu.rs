//! SPU register transactions
//!
//! Every access to the card goes through [`Spu`]: a guard delay, chip-select
//! assertion, the register word, an optional settle phase for reads, the
//! payload and chip-select release. Values are little-endian 16-bit words;
//! 32-bit registers are transferred low half first.

use std::time::{Duration, Instant};

use crate::bus::{ChipSelect, SpiBus};
use crate::error::{Error, Result};
use crate::regs::{
    self, BusMode, HostIntCtrl, HostIntStatus, DELAY_READ, DEVICEID_CTRL, HOST_INT_CTRL,
    HOST_INT_STATUS_MASK, READ_OPERATION_MASK, SPU_BUS_MODE, WRITE_OPERATION_MASK,
};

/// Number of reads performed by [`Spu::wait_for_u32`]
pub const CONFIRM_RETRIES: u32 = 4;

/// Delay used for both ports and registers until `init` has read the real ones
pub const DEFAULT_SPU_DELAY: u16 = 1000;

/// Tunable timing of the transaction unit and the firmware bootstrap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpuTiming {
    /// Busy-wait inserted before a transaction that closely follows another
    pub guard_delay: Duration,
    /// Transactions further apart than this skip the guard delay
    pub tick: Duration,
    /// Interval between reads in [`Spu::wait_for_u16`]
    pub poll_interval: Duration,
    /// Total budget of [`Spu::wait_for_u16`], spent in `poll_interval` steps
    pub wait_timeout: Duration,
    /// Interval between reads in [`Spu::wait_for_u32`]
    pub confirm_interval: Duration,
    /// Pause before each helper firmware chunk
    pub helper_chunk_delay: Duration,
}

impl Default for SpuTiming {
    fn default() -> Self {
        Self {
            guard_delay: Duration::from_nanos(400),
            tick: Duration::from_millis(10),
            poll_interval: Duration::from_micros(100),
            wait_timeout: Duration::from_secs(5),
            confirm_interval: Duration::from_millis(100),
            helper_chunk_delay: Duration::from_millis(10),
        }
    }
}

impl SpuTiming {
    /// Number of reads [`Spu::wait_for_u16`] makes before timing out
    pub fn wait_polls(&self) -> u32 {
        let polls = self
            .wait_timeout
            .as_nanos()
            .checked_div(self.poll_interval.as_nanos())
            .unwrap_or(1);
        u32::try_from(polls).unwrap_or(u32::MAX).max(1)
    }
}

/// Register transaction unit
///
/// Owns the bus and the chip-select line for the lifetime of the card. Only
/// one actor holds it at a time: the lifecycle controller during attach, the
/// link worker afterwards.
pub struct Spu<B, C> {
    bus: B,
    cs: C,
    timing: SpuTiming,
    prev_xfer: Instant,
    use_dummy_writes: bool,
    port_delay: u16,
    reg_delay: u16,
}

impl<B: SpiBus, C: ChipSelect> Spu<B, C> {
    /// Wrap a bus and chip-select line; delays start at their safe defaults
    pub fn new(bus: B, cs: C, timing: SpuTiming) -> Self {
        Self {
            bus,
            cs,
            timing,
            prev_xfer: Instant::now(),
            use_dummy_writes: false,
            port_delay: DEFAULT_SPU_DELAY,
            reg_delay: DEFAULT_SPU_DELAY,
        }
    }

    /// Timing in use
    pub fn timing(&self) -> &SpuTiming {
        &self.timing
    }

    /// Settle delay applied to port reads
    pub fn port_delay(&self) -> u16 {
        self.port_delay
    }

    /// Settle delay applied to register reads
    pub fn reg_delay(&self) -> u16 {
        self.reg_delay
    }

    /// Whether reads settle with dummy writes rather than a timed wait
    pub fn use_dummy_writes(&self) -> bool {
        self.use_dummy_writes
    }

    fn begin(&mut self) -> Result<()> {
        if self.prev_xfer.elapsed() <= self.timing.tick {
            spin(self.timing.guard_delay);
        }
        self.cs.set(true)
    }

    fn end(&mut self) -> Result<()> {
        let released = self.cs.set(false);
        self.prev_xfer = Instant::now();
        released
    }

    /// Write `data` to `reg`
    ///
    /// # Panics
    ///
    /// Panics if `data` has an odd length: the SPU moves 16-bit words only.
    pub fn write(&mut self, reg: u16, data: &[u8]) -> Result<()> {
        assert!(
            data.len() % 2 == 0,
            "SPU writes must be a whole number of 16-bit words (got {} bytes)",
            data.len()
        );
        self.begin()?;
        let header = (reg | WRITE_OPERATION_MASK).to_le_bytes();
        let result = self
            .bus
            .write(&header)
            .and_then(|()| self.bus.write(data));
        let released = self.end();
        log::trace!("spu: write 0x{:02x} ({} bytes)", reg, data.len());
        result.and(released)
    }

    /// Read `buf.len()` bytes from `reg`
    ///
    /// # Panics
    ///
    /// Panics if `buf` has an odd length.
    pub fn read(&mut self, reg: u16, buf: &mut [u8]) -> Result<()> {
        assert!(
            buf.len() % 2 == 0,
            "SPU reads must be a whole number of 16-bit words (got {} bytes)",
            buf.len()
        );
        self.begin()?;
        let result = self.read_in_transaction(reg, buf);
        let released = self.end();
        log::trace!("spu: read 0x{:02x} ({} bytes)", reg, buf.len());
        result.and(released)
    }

    fn read_in_transaction(&mut self, reg: u16, buf: &mut [u8]) -> Result<()> {
        self.bus.write(&(reg | READ_OPERATION_MASK).to_le_bytes())?;

        let delay = if regs::is_port_reg(reg) {
            self.port_delay
        } else {
            self.reg_delay
        };
        if self.use_dummy_writes {
            for _ in 0..delay / 16 {
                self.bus.write(&[0, 0])?;
            }
        } else {
            spin(Duration::from_nanos(100 + u64::from(delay) * 10));
        }

        self.bus.read(buf)
    }

    /// Write a 16-bit register
    pub fn write_u16(&mut self, reg: u16, value: u16) -> Result<()> {
        self.write(reg, &value.to_le_bytes())
    }

    /// Write a 32-bit register, low half first
    pub fn write_u32(&mut self, reg: u16, value: u32) -> Result<()> {
        self.write(reg, &value.to_le_bytes())
    }

    /// Read a 16-bit register
    pub fn read_u16(&mut self, reg: u16) -> Result<u16> {
        let mut buf = [0u8; 2];
        self.read(reg, &mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    /// Read a 32-bit register, low half first
    pub fn read_u32(&mut self, reg: u16) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read(reg, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Poll `reg` until `(value & mask) == target`
    ///
    /// With a zero mask any nonzero value satisfies the wait. Returns the
    /// matching value, or `Timeout` after [`SpuTiming::wait_polls`] reads.
    pub fn wait_for_u16(&mut self, reg: u16, mask: u16, target: u16) -> Result<u16> {
        let polls = self.timing.wait_polls();
        let mut value = 0;
        for _ in 0..polls {
            value = self.read_u16(reg)?;
            let done = if mask == 0 {
                value != 0
            } else {
                value & mask == target
            };
            if done {
                return Ok(value);
            }
            self.sleep(self.timing.poll_interval);
        }
        log::error!(
            "spu: timeout waiting for reg 0x{:02x} (mask 0x{:04x}, target 0x{:04x}, last 0x{:04x})",
            reg,
            mask,
            target,
            value
        );
        Err(Error::Timeout { reg })
    }

    /// Read `reg` up to [`CONFIRM_RETRIES`] times until it equals `target`
    pub fn wait_for_u32(&mut self, reg: u16, target: u32) -> Result<()> {
        for _ in 0..CONFIRM_RETRIES {
            if self.read_u32(reg)? == target {
                return Ok(());
            }
            self.sleep(self.timing.confirm_interval);
        }
        Err(Error::Timeout { reg })
    }

    /// Sleep through the bus so backends can account for the wait
    pub fn sleep(&mut self, duration: Duration) {
        let us = u32::try_from(duration.as_micros()).unwrap_or(u32::MAX);
        self.bus.delay_us(us);
    }

    /// Program the bus mode and verify it reads back
    pub fn set_bus_mode(&mut self, mode: BusMode) -> Result<()> {
        self.write_u16(SPU_BUS_MODE, mode.bits())?;
        let readback = self.read_u16(SPU_BUS_MODE)?;
        if readback != mode.bits() {
            log::error!(
                "spu: can't read bus mode register (wrote 0x{:x}, read 0x{:x})",
                mode.bits(),
                readback
            );
            return Err(Error::Io("bus mode register readback mismatch".into()));
        }
        Ok(())
    }

    /// Bring the SPU into a known state and discover its settle delays
    pub fn init(&mut self, use_dummy_writes: bool) -> Result<()> {
        self.use_dummy_writes = false;
        self.set_bus_mode(BusMode::timed())?;

        self.port_delay = DEFAULT_SPU_DELAY;
        self.reg_delay = DEFAULT_SPU_DELAY;
        let delay = self.read_u32(DELAY_READ)?;
        self.port_delay = (delay & 0xffff) as u16;
        self.reg_delay = (delay >> 16) as u16;

        if use_dummy_writes {
            self.use_dummy_writes = true;
            self.set_bus_mode(BusMode::dummy_clock())?;
        }

        log::debug!(
            "spu: initialized, port_delay=0x{:04x} reg_delay=0x{:04x} dummy_writes={}",
            self.port_delay,
            self.reg_delay,
            self.use_dummy_writes
        );
        Ok(())
    }

    /// Read the chip id and revision
    pub fn chip_revision(&mut self) -> Result<(u16, u8)> {
        let dev_ctrl = self.read_u32(DEVICEID_CTRL)?;
        Ok((
            regs::deviceid_to_card_id(dev_ctrl),
            regs::deviceid_to_card_rev(dev_ctrl),
        ))
    }

    /// Select which host interrupts are raised and how causes are acknowledged
    ///
    /// `suppress_host_int` masks every host interrupt source; `auto_int` lets
    /// the card raise the "over" causes by itself.
    pub fn set_interrupt_mode(&mut self, suppress_host_int: bool, auto_int: bool) -> Result<()> {
        if suppress_host_int {
            self.write_u16(HOST_INT_STATUS_MASK, 0)?;
        } else {
            self.write_u16(HOST_INT_STATUS_MASK, HostIntStatus::all().bits())?;
        }

        if auto_int {
            self.write_u16(HOST_INT_CTRL, HostIntCtrl::all().bits())?;
        } else {
            self.write_u16(HOST_INT_STATUS_MASK, 0)?;
        }
        Ok(())
    }
}

fn spin(duration: Duration) {
    let start = Instant::now();
    while start.elapsed() < duration {
        std::hint::spin_loop();
    }
}
