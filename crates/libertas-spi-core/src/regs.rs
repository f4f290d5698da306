//! SPU register map
//!
//! Offsets and bit assignments of the SPI interface unit. These are a fixed
//! hardware contract shared with the 8385 and 8686 firmware.

use bitflags::bitflags;

/// Device id (upper 16 bits) and revision (low 8 bits)
pub const DEVICEID_CTRL: u16 = 0x00;
/// Generic I/O read/write port
pub const IO_RDWRPORT: u16 = 0x0C;
/// Command read/write port
pub const CMD_RDWRPORT: u16 = 0x18;
/// Data read/write port
pub const DATA_RDWRPORT: u16 = 0x24;
/// Scratch pad 1: firmware chunk lengths, rx data length
pub const SCRATCH_1: u16 = 0x28;
/// Scratch pad 2: command response length
pub const SCRATCH_2: u16 = 0x2C;
/// Scratch pad 3: card event cause
pub const SCRATCH_3: u16 = 0x30;
/// Scratch pad 4: firmware download magic
pub const SCRATCH_4: u16 = 0x34;
/// Host interrupt control
pub const HOST_INT_CTRL: u16 = 0x40;
/// Card interrupt cause (written by the host to signal the card)
pub const CARD_INT_CAUSE: u16 = 0x44;
/// Host interrupt status (what the card wants from the host)
pub const HOST_INT_STATUS: u16 = 0x5C;
/// Host interrupt status mask
pub const HOST_INT_STATUS_MASK: u16 = 0x64;
/// Read delays: port delay in the low half, register delay in the high half
pub const DELAY_READ: u16 = 0x6C;
/// SPU bus mode
pub const SPU_BUS_MODE: u16 = 0x70;

/// Direction flag OR-ed into the register word for reads
pub const READ_OPERATION_MASK: u16 = 0x0000;
/// Direction flag OR-ed into the register word for writes
pub const WRITE_OPERATION_MASK: u16 = 0x8000;

/// Size of the command buffer; also bounds every single upload or download
pub const CMD_BUF_SIZE: usize = 2400;

/// Value the main firmware leaves in scratch 4 once it is running
pub const SUCCESSFUL_FW_DOWNLOAD_MAGIC: u32 = 0x0008_8888;
/// Written to scratch 1 to tell the boot ROM the helper image is complete
pub const FIRMWARE_DNLD_OK: u16 = 0x0000;
/// Chunk size of the helper download, fixed by the boot ROM
pub const HELPER_FW_LOAD_CHUNK_SZ: usize = 64;
/// Number of CRC errors tolerated in a row during the main download
pub const MAX_MAIN_FW_LOAD_CRC_ERR: u32 = 5;

/// Port registers use the (longer) port settle delay on reads
pub fn is_port_reg(reg: u16) -> bool {
    matches!(reg, IO_RDWRPORT | CMD_RDWRPORT | DATA_RDWRPORT)
}

/// Extract the chip id from the device id/control register
pub fn deviceid_to_card_id(dev_ctrl: u32) -> u16 {
    ((dev_ctrl & 0xffff_0000) >> 16) as u16
}

/// Extract the chip revision from the device id/control register
pub fn deviceid_to_card_rev(dev_ctrl: u32) -> u8 {
    (dev_ctrl & 0x0000_00ff) as u8
}

bitflags! {
    /// Host interrupt status (and status mask) bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HostIntStatus: u16 {
        /// Card can accept a data frame
        const TX_DOWNLOAD_RDY  = 1 << 0;
        /// Card has a data frame for the host
        const RX_UPLOAD_RDY    = 1 << 1;
        /// Card can accept a command (and took the previous one)
        const CMD_DOWNLOAD_RDY = 1 << 2;
        /// Card raised an event
        const CARD_EVENT       = 1 << 3;
        /// Card has a command response for the host
        const CMD_UPLOAD_RDY   = 1 << 4;
    }
}

bitflags! {
    /// Host interrupt control bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HostIntCtrl: u16 {
        /// Raise "tx download over" automatically
        const TX_DOWNLOAD_OVER_AUTO  = 1 << 5;
        /// Raise "rx upload over" automatically
        const RX_UPLOAD_OVER_AUTO    = 1 << 6;
        /// Raise "cmd download over" automatically
        const CMD_DOWNLOAD_OVER_AUTO = 1 << 7;
        /// Raise "cmd upload over" automatically
        const CMD_UPLOAD_OVER_AUTO   = 1 << 8;
    }
}

bitflags! {
    /// Card interrupt cause bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct CardIntCause: u16 {
        /// Host finished writing a data frame
        const TX_DOWNLOAD_OVER  = 1 << 0;
        /// Host finished reading a data frame
        const RX_UPLOAD_OVER    = 1 << 1;
        /// Host finished writing a command (or firmware chunk)
        const CMD_DOWNLOAD_OVER = 1 << 2;
        /// Host event
        const HOST_EVENT        = 1 << 3;
        /// Host finished reading a command response
        const CMD_UPLOAD_OVER   = 1 << 4;
    }
}

bitflags! {
    /// SPU bus mode register
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BusMode: u16 {
        /// 16-bit address, 16-bit data
        const ADDRESS_16_DATA_16 = 0x2;
        /// Settle reads by clocking dummy words instead of waiting
        const DELAY_METHOD_DUMMY_CLOCK = 0x4;
        /// Sample on the falling clock edge (rising when clear)
        const CLOCK_PHASE_FALLING = 0x8;
    }
}

impl BusMode {
    /// Rising clock phase, timed delay, 16-bit address and data
    pub const fn timed() -> Self {
        Self::ADDRESS_16_DATA_16
    }

    /// Rising clock phase, dummy-clock delay, 16-bit address and data
    pub const fn dummy_clock() -> Self {
        Self::ADDRESS_16_DATA_16.union(Self::DELAY_METHOD_DUMMY_CLOCK)
    }
}
