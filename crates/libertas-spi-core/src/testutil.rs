//! Scripted register bus for unit tests
//!
//! Decodes SPU transactions (register word, settle words, payload) framed by
//! chip-select and answers reads from a register file, per-register scripts
//! or per-port byte streams.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::bus::{ChipSelect, SpiBus};
use crate::error::{Error, Result};
use crate::host::{NetDevice, NetStack, Upcalls};
use crate::irq::InterruptBridge;
use crate::platform::{PlatformData, SpiDevice};
use crate::queue::{Direction, Submitter};
use crate::regs::{is_port_reg, WRITE_OPERATION_MASK};

/// A completed transaction as seen on the wire
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Xfer {
    Write { reg: u16, data: Vec<u8> },
    Read { reg: u16, len: usize, dummy_words: usize },
}

#[derive(Default)]
pub(crate) struct MockState {
    /// Backing register file
    pub regs: HashMap<u16, u32>,
    /// Values returned (in order) before falling back to `regs`
    pub scripted: HashMap<u16, VecDeque<u32>>,
    /// Byte streams served by port reads
    pub port_data: HashMap<u16, VecDeque<u8>>,
    /// Registers whose writes are logged but do not change `regs`
    pub pinned: HashSet<u16>,
    /// Registers whose reads fail with a bus error
    pub fail_reads: HashSet<u16>,
    /// Registers whose writes fail with a bus error
    pub fail_writes: HashSet<u16>,
    pub log: Vec<Xfer>,
    pub cs_active: bool,
    pub cs_assertions: usize,
    /// Lifecycle calls made on the board and the network stack, in order
    pub events: Vec<&'static str>,
    header: Option<u16>,
    payload: Vec<u8>,
    read_len: usize,
}

impl MockState {
    pub fn set_reg(&mut self, reg: u16, value: u32) {
        self.regs.insert(reg, value);
    }

    pub fn script(&mut self, reg: u16, values: &[u32]) {
        self.scripted
            .entry(reg)
            .or_default()
            .extend(values.iter().copied());
    }

    pub fn push_port(&mut self, reg: u16, bytes: &[u8]) {
        self.port_data
            .entry(reg)
            .or_default()
            .extend(bytes.iter().copied());
    }

    /// Payloads written to `reg`, in order
    pub fn writes_to(&self, reg: u16) -> Vec<Vec<u8>> {
        self.log
            .iter()
            .filter_map(|x| match x {
                Xfer::Write { reg: r, data } if *r == reg => Some(data.clone()),
                _ => None,
            })
            .collect()
    }

    /// Number of read transactions on `reg`
    pub fn reads_of(&self, reg: u16) -> usize {
        self.log
            .iter()
            .filter(|x| matches!(x, Xfer::Read { reg: r, .. } if *r == reg))
            .count()
    }

    fn finish(&mut self) {
        let Some(header) = self.header.take() else {
            return;
        };
        let reg = header & !WRITE_OPERATION_MASK;
        let payload = std::mem::take(&mut self.payload);
        if header & WRITE_OPERATION_MASK != 0 {
            if !self.pinned.contains(&reg) && !is_port_reg(reg) {
                let mut raw = [0u8; 4];
                let n = payload.len().min(4);
                raw[..n].copy_from_slice(&payload[..n]);
                self.regs.insert(reg, u32::from_le_bytes(raw));
            }
            self.log.push(Xfer::Write { reg, data: payload });
        } else {
            self.log.push(Xfer::Read {
                reg,
                len: std::mem::take(&mut self.read_len),
                dummy_words: payload.len() / 2,
            });
        }
    }
}

#[derive(Clone, Default)]
pub(crate) struct MockCard(Arc<Mutex<MockState>>);

impl MockCard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> MutexGuard<'_, MockState> {
        self.0.lock().unwrap()
    }

    pub fn bus(&self) -> MockBus {
        MockBus(self.clone())
    }

    pub fn cs(&self) -> MockCs {
        MockCs(self.clone())
    }
}

pub(crate) struct MockBus(MockCard);

impl SpiBus for MockBus {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        let mut st = self.0.state();
        if !st.cs_active {
            return Err(Error::bus("write with chip-select idle"));
        }
        match st.header {
            None => {
                let header = u16::from_le_bytes([data[0], data[1]]);
                let reg = header & !WRITE_OPERATION_MASK;
                if header & WRITE_OPERATION_MASK != 0 && st.fail_writes.contains(&reg) {
                    return Err(Error::bus("injected write failure"));
                }
                st.header = Some(header);
                st.payload.extend_from_slice(&data[2..]);
            }
            Some(_) => st.payload.extend_from_slice(data),
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        let mut st = self.0.state();
        let header = st.header.ok_or_else(|| Error::bus("read without header"))?;
        let reg = header & !WRITE_OPERATION_MASK;
        if st.fail_reads.contains(&reg) {
            return Err(Error::bus("injected read failure"));
        }
        st.read_len += buf.len();
        if let Some(value) = st.scripted.get_mut(&reg).and_then(|q| q.pop_front()) {
            fill_le(buf, value);
        } else if is_port_reg(reg) {
            let port = st.port_data.entry(reg).or_default();
            for b in buf.iter_mut() {
                *b = port.pop_front().unwrap_or(0);
            }
        } else {
            let value = st.regs.get(&reg).copied().unwrap_or(0);
            fill_le(buf, value);
        }
        Ok(())
    }

    fn delay_us(&mut self, _us: u32) {
        std::thread::yield_now();
    }
}

fn fill_le(buf: &mut [u8], value: u32) {
    let raw = value.to_le_bytes();
    for (i, b) in buf.iter_mut().enumerate() {
        *b = raw.get(i).copied().unwrap_or(0);
    }
}

pub(crate) struct MockCs(MockCard);

impl Drop for MockCs {
    fn drop(&mut self) {
        self.0.state().events.push("cs_released");
    }
}

impl ChipSelect for MockCs {
    fn set(&mut self, active: bool) -> Result<()> {
        let mut st = self.0.state();
        if active {
            st.cs_assertions += 1;
        } else {
            st.finish();
        }
        st.cs_active = active;
        Ok(())
    }
}

/// Board backed by a [`MockCard`]
pub(crate) struct MockDevice {
    card: MockCard,
    pub pdata: Option<PlatformData>,
    pub fail_irq: bool,
}

impl MockDevice {
    pub fn new(card: &MockCard) -> Self {
        Self {
            card: card.clone(),
            pdata: Some(PlatformData {
                gpio_cs: 42,
                use_dummy_writes: false,
            }),
            fail_irq: false,
        }
    }

    fn event(&self, event: &'static str) {
        self.card.state().events.push(event);
    }
}

pub(crate) struct MockIrq {
    card: MockCard,
    _bridge: InterruptBridge,
}

impl Drop for MockIrq {
    fn drop(&mut self) {
        self.card.state().events.push("irq_released");
    }
}

impl SpiDevice for MockDevice {
    type Bus = MockBus;
    type Cs = MockCs;
    type Irq = MockIrq;

    fn name(&self) -> &str {
        "mock"
    }

    fn platform_data(&self) -> Option<&PlatformData> {
        self.pdata.as_ref()
    }

    fn setup(&mut self) -> Result<()> {
        self.event("setup");
        Ok(())
    }

    fn teardown(&mut self) {
        self.event("teardown");
    }

    fn open_bus(&mut self) -> Result<MockBus> {
        self.event("open_bus");
        Ok(self.card.bus())
    }

    fn request_chip_select(&mut self, _gpio: u32) -> Result<MockCs> {
        self.event("request_cs");
        Ok(self.card.cs())
    }

    fn request_irq(&mut self, bridge: InterruptBridge) -> Result<MockIrq> {
        self.event("request_irq");
        if self.fail_irq {
            return Err(Error::bus("irq line busy"));
        }
        Ok(MockIrq {
            card: self.card.clone(),
            _bridge: bridge,
        })
    }
}

/// Network stack that records lifecycle calls and discards traffic
pub(crate) struct MockNet(MockCard);

impl MockNet {
    pub fn new(card: &MockCard) -> Self {
        Self(card.clone())
    }
}

pub(crate) struct MockNetDev(MockCard);

impl Upcalls for MockNetDev {
    fn deliver_command_response(&self, _response: &[u8]) -> Result<()> {
        Ok(())
    }

    fn deliver_received_packet(&self, _frame: Vec<u8>) -> Result<()> {
        Ok(())
    }

    fn notify_prior_transfer_complete(&self, _direction: Direction) {}

    fn deliver_event(&self, _cause: u8) {}
}

impl NetDevice for MockNetDev {
    fn start(&self) -> Result<()> {
        self.0.state().events.push("start");
        Ok(())
    }

    fn stop(&self) {
        self.0.state().events.push("stop");
    }

    fn mark_surprise_removed(&self) {
        self.0.state().events.push("surprise_removed");
    }
}

impl NetStack for MockNet {
    type Device = MockNetDev;

    fn add_card(&mut self, _submitter: Submitter) -> Result<MockNetDev> {
        self.0.state().events.push("add_card");
        Ok(MockNetDev(self.0.clone()))
    }

    fn remove_card(&mut self, _device: Arc<MockNetDev>) {
        self.0.state().events.push("remove_card");
    }
}
