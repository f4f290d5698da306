//! Register-level model of the SPU and the card behind it

use std::collections::{HashMap, HashSet, VecDeque};

use libertas_spi_core::error::{Error, Result};
use libertas_spi_core::regs::{
    self, CardIntCause, HostIntStatus, CARD_INT_CAUSE, CMD_RDWRPORT, DATA_RDWRPORT, DELAY_READ,
    DEVICEID_CTRL, FIRMWARE_DNLD_OK, HOST_INT_STATUS, SCRATCH_1, SCRATCH_2, SCRATCH_3, SCRATCH_4,
    SUCCESSFUL_FW_DOWNLOAD_MAGIC, WRITE_OPERATION_MASK,
};
use libertas_spi_core::InterruptBridge;

use crate::DummyConfig;

/// Where the emulated card is in its boot sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootState {
    /// Boot ROM, taking helper chunks
    Rom,
    /// Helper running, pulling the main image
    Helper {
        /// The next scratch 1 read is the initial zero
        first_query: bool,
    },
    /// Main firmware running
    Running,
}

/// Emulated card
///
/// Shared between the bus, the chip-select line and the test through
/// [`DummyCard`](crate::DummyCard).
pub struct EmulatedCard {
    config: DummyConfig,
    regs: HashMap<u16, u32>,
    boot: BootState,

    cs_active: bool,
    header: Option<u16>,
    payload: Vec<u8>,

    helper_received: Vec<u8>,
    main_received: Vec<u8>,
    main_request: u16,
    main_chunk_writes: usize,
    last_chunk_corrupt: bool,

    cmd_responses: VecDeque<Vec<u8>>,
    rx_frames: VecDeque<Vec<u8>>,
    events: VecDeque<u32>,
    received_commands: Vec<Vec<u8>>,
    received_frames: Vec<Vec<u8>>,

    fail_reads: HashSet<u16>,
    bridge: Option<InterruptBridge>,
    powered: bool,
    power_cycles: usize,
}

impl EmulatedCard {
    /// Power up a card
    pub fn new(config: DummyConfig) -> Self {
        let mut regs = HashMap::new();
        regs.insert(
            DEVICEID_CTRL,
            u32::from(config.chip_id) << 16 | u32::from(config.chip_rev),
        );
        regs.insert(
            DELAY_READ,
            u32::from(config.reg_delay) << 16 | u32::from(config.port_delay),
        );
        let boot = if config.firmware_resident {
            BootState::Running
        } else {
            BootState::Rom
        };

        Self {
            config,
            regs,
            boot,
            cs_active: false,
            header: None,
            payload: Vec::new(),
            helper_received: Vec::new(),
            main_received: Vec::new(),
            main_request: 0,
            main_chunk_writes: 0,
            last_chunk_corrupt: false,
            cmd_responses: VecDeque::new(),
            rx_frames: VecDeque::new(),
            events: VecDeque::new(),
            received_commands: Vec::new(),
            received_frames: Vec::new(),
            fail_reads: HashSet::new(),
            bridge: None,
            powered: false,
            power_cycles: 0,
        }
    }

    /// Configuration the card was created with
    pub fn config(&self) -> &DummyConfig {
        &self.config
    }

    /// Boot state
    pub fn boot_state(&self) -> BootState {
        self.boot
    }

    /// True once the main firmware runs
    pub fn is_running(&self) -> bool {
        self.boot == BootState::Running
    }

    /// Helper bytes as received, including chunk padding
    pub fn helper_received(&self) -> &[u8] {
        &self.helper_received
    }

    /// Main image bytes accepted so far
    pub fn main_received(&self) -> &[u8] {
        &self.main_received
    }

    /// Main image chunks written, resends included
    pub fn main_chunk_writes(&self) -> usize {
        self.main_chunk_writes
    }

    /// Commands the host sent, padded as on the wire
    pub fn received_commands(&self) -> &[Vec<u8>] {
        &self.received_commands
    }

    /// Data frames the host sent, padded as on the wire
    pub fn received_frames(&self) -> &[Vec<u8>] {
        &self.received_frames
    }


    /// Chip-select currently asserted
    pub fn cs_active(&self) -> bool {
        self.cs_active
    }

    /// Board setup ran and teardown has not
    pub fn powered(&self) -> bool {
        self.powered
    }

    /// Completed setup/teardown pairs
    pub fn power_cycles(&self) -> usize {
        self.power_cycles
    }

    pub(crate) fn power_up(&mut self) {
        self.powered = true;
    }

    pub(crate) fn power_down(&mut self) {
        if self.powered {
            self.power_cycles += 1;
        }
        self.powered = false;
    }

    /// Raw register value
    pub fn reg(&self, reg: u16) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    /// Make reads of `reg` fail with a bus error
    pub fn fail_reads(&mut self, reg: u16) {
        self.fail_reads.insert(reg);
    }

    /// Let reads of `reg` succeed again
    pub fn clear_read_faults(&mut self) {
        self.fail_reads.clear();
    }

    /// Queue a command response and raise the interrupt
    pub fn push_command_response(&mut self, response: &[u8]) {
        self.cmd_responses.push_back(response.to_vec());
        self.raise_interrupt();
    }

    /// Queue a received frame and raise the interrupt
    pub fn push_rx_frame(&mut self, frame: &[u8]) {
        self.rx_frames.push_back(frame.to_vec());
        self.raise_interrupt();
    }

    /// Queue a card event and raise the interrupt
    pub fn push_event(&mut self, cause: u32) {
        self.events.push_back(cause);
        self.raise_interrupt();
    }

    /// Interrupt binding currently installed
    pub fn irq_bound(&self) -> bool {
        self.bridge.is_some()
    }

    pub(crate) fn bind_irq(&mut self, bridge: InterruptBridge) {
        self.bridge = Some(bridge);
    }

    pub(crate) fn unbind_irq(&mut self) {
        self.bridge = None;
    }

    fn raise_interrupt(&mut self) {
        if let Some(bridge) = &self.bridge {
            log::trace!("dummy: raising host interrupt");
            bridge.on_interrupt();
        }
    }

    fn host_int_status(&self) -> HostIntStatus {
        match self.boot {
            BootState::Rom | BootState::Helper { .. } => HostIntStatus::CMD_DOWNLOAD_RDY,
            BootState::Running => {
                let mut status = HostIntStatus::CMD_DOWNLOAD_RDY | HostIntStatus::TX_DOWNLOAD_RDY;
                status.set(HostIntStatus::CMD_UPLOAD_RDY, !self.cmd_responses.is_empty());
                status.set(HostIntStatus::RX_UPLOAD_RDY, !self.rx_frames.is_empty());
                status.set(HostIntStatus::CARD_EVENT, !self.events.is_empty());
                status
            }
        }
    }

    /// Length the helper asks for next
    fn next_main_request(&mut self) -> u16 {
        if self.last_chunk_corrupt {
            return self.main_request | 1;
        }
        let remaining = self
            .config
            .main_image_len
            .saturating_sub(self.main_received.len());
        if remaining == 0 {
            log::debug!("dummy: main firmware complete, running");
            self.boot = BootState::Running;
            self.main_request = 0;
            return 0;
        }
        let len = remaining.min(usize::from(self.config.main_chunk_len));
        // Lengths are even: the low bit is the CRC flag
        self.main_request = ((len + 1) & !1) as u16;
        self.main_request
    }

    pub(crate) fn set_cs(&mut self, active: bool) {
        if self.cs_active && !active {
            self.end_transaction();
        }
        self.cs_active = active;
    }

    fn end_transaction(&mut self) {
        let Some(header) = self.header.take() else {
            return;
        };
        let payload = std::mem::take(&mut self.payload);
        if header & WRITE_OPERATION_MASK != 0 {
            self.register_write(header & !WRITE_OPERATION_MASK, payload);
        }
    }

    pub(crate) fn bus_write(&mut self, data: &[u8]) -> Result<()> {
        if !self.cs_active {
            return Err(Error::bus("dummy: write with chip-select idle"));
        }
        match self.header {
            None if data.len() >= 2 => {
                self.header = Some(u16::from_le_bytes([data[0], data[1]]));
                self.payload.extend_from_slice(&data[2..]);
            }
            None => return Err(Error::bus("dummy: short register word")),
            // After a read header these are settle words and are dropped
            Some(_) => self.payload.extend_from_slice(data),
        }
        Ok(())
    }

    pub(crate) fn bus_read(&mut self, buf: &mut [u8]) -> Result<()> {
        if !self.cs_active {
            return Err(Error::bus("dummy: read with chip-select idle"));
        }
        let header = self
            .header
            .ok_or_else(|| Error::bus("dummy: read without register word"))?;
        if header & WRITE_OPERATION_MASK != 0 {
            return Err(Error::bus("dummy: read in a write transaction"));
        }
        let reg = header;
        if self.fail_reads.contains(&reg) {
            return Err(Error::bus(format!("dummy: injected read fault on 0x{:02x}", reg)));
        }

        match reg {
            CMD_RDWRPORT | DATA_RDWRPORT => {
                let queue = if reg == CMD_RDWRPORT {
                    &mut self.cmd_responses
                } else {
                    &mut self.rx_frames
                };
                let packet = queue.pop_front().unwrap_or_default();
                buf.fill(0);
                let n = packet.len().min(buf.len());
                buf[..n].copy_from_slice(&packet[..n]);
            }
            _ => {
                let value = self.register_read(reg);
                let raw = value.to_le_bytes();
                for (i, b) in buf.iter_mut().enumerate() {
                    *b = raw.get(i).copied().unwrap_or(0);
                }
            }
        }
        Ok(())
    }

    fn register_read(&mut self, reg: u16) -> u32 {
        match (reg, self.boot) {
            (HOST_INT_STATUS, _) => u32::from(self.host_int_status().bits()),
            (SCRATCH_1, BootState::Helper { first_query: true }) => {
                self.boot = BootState::Helper { first_query: false };
                0
            }
            (SCRATCH_1, BootState::Helper { first_query: false }) => {
                u32::from(self.next_main_request())
            }
            (SCRATCH_1, BootState::Running) => self
                .rx_frames
                .front()
                .map_or(0, |f| f.len() as u32),
            (SCRATCH_2, BootState::Running) => self
                .cmd_responses
                .front()
                .map_or(0, |r| r.len() as u32),
            (SCRATCH_3, BootState::Running) => self.events.pop_front().unwrap_or(0),
            (SCRATCH_4, BootState::Running) => SUCCESSFUL_FW_DOWNLOAD_MAGIC,
            (SCRATCH_4, _) => 0,
            _ => self.reg(reg),
        }
    }

    fn register_write(&mut self, reg: u16, payload: Vec<u8>) {
        if regs::is_port_reg(reg) {
            self.port_write(reg, payload);
            return;
        }

        let mut raw = [0u8; 4];
        let n = payload.len().min(4);
        raw[..n].copy_from_slice(&payload[..n]);
        let value = u32::from_le_bytes(raw);

        match reg {
            // Status bits are derived from the card state
            HOST_INT_STATUS => {}
            CARD_INT_CAUSE => {
                let cause = CardIntCause::from_bits_truncate(value as u16);
                if self.boot == BootState::Rom
                    && cause.contains(CardIntCause::CMD_DOWNLOAD_OVER)
                    && self.reg(SCRATCH_1) == u32::from(FIRMWARE_DNLD_OK)
                {
                    log::debug!(
                        "dummy: helper received ({} bytes), booting",
                        self.helper_received.len()
                    );
                    self.boot = BootState::Helper { first_query: true };
                }
            }
            _ => {
                self.regs.insert(reg, value);
            }
        }
    }

    fn port_write(&mut self, reg: u16, payload: Vec<u8>) {
        match (reg, self.boot) {
            (CMD_RDWRPORT, BootState::Rom) => self.helper_received.extend_from_slice(&payload),
            (CMD_RDWRPORT, BootState::Helper { .. }) => {
                let index = self.main_chunk_writes;
                self.main_chunk_writes += 1;
                if self.config.always_crc_error || self.config.crc_error_chunks.contains(&index) {
                    log::debug!("dummy: corrupting main chunk {}", index);
                    self.last_chunk_corrupt = true;
                    return;
                }
                self.last_chunk_corrupt = false;
                let remaining = self
                    .config
                    .main_image_len
                    .saturating_sub(self.main_received.len());
                let n = payload.len().min(remaining);
                self.main_received.extend_from_slice(&payload[..n]);
            }
            (CMD_RDWRPORT, BootState::Running) => {
                if self.config.echo_commands {
                    self.cmd_responses.push_back(payload.clone());
                }
                self.received_commands.push(payload);
                // Ready for the next download
                self.raise_interrupt();
            }
            (DATA_RDWRPORT, BootState::Running) => {
                self.received_frames.push(payload);
                self.raise_interrupt();
            }
            _ => log::warn!(
                "dummy: unexpected {} byte write to port 0x{:02x} in {:?}",
                payload.len(),
                reg,
                self.boot
            ),
        }
    }
}
