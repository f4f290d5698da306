//! Card lifecycle
//!
//! [`Card::attach`] brings a card from power-on to a running link:
//! board setup, chip-select, SPU init, chip identification, firmware
//! download, interrupt mode, network registration, worker start, interrupt
//! binding and finally the network device. A failure unwinds only the steps
//! that completed. [`Card::detach`] (or dropping the card) undoes everything
//! in reverse.

use std::sync::Arc;

use crate::bus::{ChipSelect, SpiBus};
use crate::chip::{self, FirmwareNames};
use crate::error::{Error, Result};
use crate::firmware::{FirmwareProvider, LoadProgress, NoProgress};
use crate::host::{NetDevice, NetStack};
use crate::irq::InterruptBridge;
use crate::platform::{PlatformData, SpiDevice};
use crate::queue::{Direction, Submitter, TransferQueues};
use crate::regs::{SCRATCH_4, SUCCESSFUL_FW_DOWNLOAD_MAGIC};
use crate::signal::wake_pair;
use crate::spu::{Spu, SpuTiming};
use crate::worker::{LinkWorker, WorkerHandle, WorkerState};

/// What attach (or probe) learned about the card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    /// Chip id from the device id register
    pub chip_id: u16,
    /// Chip revision from the device id register
    pub chip_rev: u8,
    /// Firmware image names, when the chip is in the identity table
    pub firmware: Option<FirmwareNames>,
    /// Firmware was already running, so nothing was downloaded
    pub firmware_resident: bool,
    /// Settle delay for port reads
    pub port_delay: u16,
    /// Settle delay for register reads
    pub reg_delay: u16,
    /// Reads settle with dummy writes
    pub use_dummy_writes: bool,
}

/// Runtime resources, present from a successful attach until detach
struct Link<D: SpiDevice, N: NetStack> {
    netdev: Arc<N::Device>,
    worker: WorkerHandle<D::Bus, D::Cs>,
    irq: D::Irq,
}

/// An attached card with a running link
pub struct Card<D: SpiDevice, N: NetStack> {
    device: D,
    net: N,
    info: CardInfo,
    queues: Arc<TransferQueues>,
    submitter: Submitter,
    link: Option<Link<D, N>>,
}

fn platform_data<D: SpiDevice>(device: &D) -> Result<PlatformData> {
    match device.platform_data() {
        Some(pdata) => Ok(*pdata),
        None => {
            log::error!("card: {}: no platform data", device.name());
            Err(Error::NoPlatformData)
        }
    }
}

impl CardInfo {
    /// A link can be brought up: the firmware runs already or its images are known
    pub fn is_supported(&self) -> bool {
        self.firmware_resident || self.firmware.is_some()
    }
}

/// Bring up the SPU and read what the card is and what it runs
///
/// An unknown chip is not an error here; `firmware` is left empty.
fn identify<B, C>(spu: &mut Spu<B, C>, pdata: &PlatformData) -> Result<CardInfo>
where
    B: SpiBus,
    C: ChipSelect,
{
    spu.init(pdata.use_dummy_writes)?;
    let (chip_id, chip_rev) = spu.chip_revision()?;
    let scratch = spu.read_u32(SCRATCH_4)?;
    let firmware_resident = scratch == SUCCESSFUL_FW_DOWNLOAD_MAGIC;
    let firmware = chip::firmware_names(chip_id).ok();

    Ok(CardInfo {
        chip_id,
        chip_rev,
        firmware,
        firmware_resident,
        port_delay: spu.port_delay(),
        reg_delay: spu.reg_delay(),
        use_dummy_writes: spu.use_dummy_writes(),
    })
}

fn open_spu<D: SpiDevice>(
    device: &mut D,
    pdata: &PlatformData,
    timing: SpuTiming,
) -> Result<Spu<D::Bus, D::Cs>> {
    let bus = device.open_bus()?;
    let cs = device.request_chip_select(pdata.gpio_cs)?;
    Ok(Spu::new(bus, cs, timing))
}

/// Read the card identity without downloading firmware or starting a link
///
/// Runs the board hooks around the access. An unsupported chip still yields
/// its [`CardInfo`]; check [`CardInfo::is_supported`].
pub fn probe<D: SpiDevice>(device: &mut D, timing: SpuTiming) -> Result<CardInfo> {
    let pdata = platform_data(device)?;
    device.setup()?;
    let result =
        open_spu(device, &pdata, timing).and_then(|mut spu| identify(&mut spu, &pdata));
    device.teardown();
    result
}

impl<D, N> Card<D, N>
where
    D: SpiDevice,
    N: NetStack,
{
    /// Attach a card without progress reporting
    pub fn attach<F>(device: D, net: N, firmware: &F, timing: SpuTiming) -> Result<Self>
    where
        F: FirmwareProvider + ?Sized,
    {
        Self::attach_with_progress(device, net, firmware, timing, &mut NoProgress)
    }

    /// Attach a card, reporting firmware download progress
    pub fn attach_with_progress<F, P>(
        mut device: D,
        mut net: N,
        firmware: &F,
        timing: SpuTiming,
        progress: &mut P,
    ) -> Result<Self>
    where
        F: FirmwareProvider + ?Sized,
        P: LoadProgress + ?Sized,
    {
        let pdata = platform_data(&device)?;
        device.setup()?;

        let queues = Arc::new(TransferQueues::new());
        match Self::bring_up(&mut device, &mut net, &queues, pdata, firmware, timing, progress) {
            Ok((info, submitter, link)) => {
                log::info!(
                    "card: {}: chip 0x{:02x} rev 0x{:02x} up",
                    device.name(),
                    info.chip_id,
                    info.chip_rev
                );
                Ok(Self {
                    device,
                    net,
                    info,
                    queues,
                    submitter,
                    link: Some(link),
                })
            }
            Err(e) => {
                queues.close();
                queues.drain();
                device.teardown();
                log::error!(
                    "card: {}: attach failed: {} ({})",
                    device.name(),
                    e,
                    e.errno()
                );
                Err(e)
            }
        }
    }

    fn bring_up<F, P>(
        device: &mut D,
        net: &mut N,
        queues: &Arc<TransferQueues>,
        pdata: PlatformData,
        firmware: &F,
        timing: SpuTiming,
        progress: &mut P,
    ) -> Result<(CardInfo, Submitter, Link<D, N>)>
    where
        F: FirmwareProvider + ?Sized,
        P: LoadProgress + ?Sized,
    {
        let (waiter, wake) = wake_pair();

        let mut spu = open_spu(device, &pdata, timing)?;

        let info = identify(&mut spu, &pdata)?;
        if info.firmware_resident {
            log::info!("card: firmware is already loaded");
        } else {
            let names = info
                .firmware
                .as_ref()
                .ok_or(Error::UnsupportedChip(info.chip_id))?;
            log::debug!(
                "card: initializing firmware (chip_id = 0x{:04x}, chip_rev = 0x{:02x})",
                info.chip_id,
                info.chip_rev
            );
            crate::bootstrap::bootstrap(&mut spu, names, firmware, progress)?;
        }

        spu.set_interrupt_mode(false, true)?;

        let submitter = Submitter::new(queues.clone(), wake.clone());
        let netdev = Arc::new(net.add_card(submitter.clone())?);

        let worker = match LinkWorker::new(spu, queues.clone(), netdev.clone(), waiter)
            .and_then(|w| w.spawn(wake.clone()))
        {
            Ok(worker) => worker,
            Err(e) => {
                log::error!("card: error creating SPI thread: {}", e);
                net.remove_card(netdev);
                return Err(e);
            }
        };

        let irq = match device.request_irq(InterruptBridge::new(wake.clone())) {
            Ok(irq) => irq,
            Err(e) => {
                log::error!("card: can't get host irq line: {}", e);
                let spu = worker.terminate();
                net.remove_card(netdev);
                drop(spu);
                return Err(e);
            }
        };

        if let Err(e) = netdev.start() {
            drop(irq);
            let spu = worker.terminate();
            net.remove_card(netdev);
            drop(spu);
            return Err(e);
        }

        // Pick up anything the card raised before the interrupt was bound
        wake.post();

        Ok((
            info,
            submitter,
            Link {
                netdev,
                worker,
                irq,
            },
        ))
    }

    /// What attach learned about the card
    pub fn info(&self) -> &CardInfo {
        &self.info
    }

    /// Submission handle for the upper layer
    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    /// Board the card is attached through
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Current worker state
    pub fn worker_state(&self) -> WorkerState {
        self.link
            .as_ref()
            .map_or(WorkerState::Terminated, |l| l.worker.state())
    }

    /// Buffers waiting in a queue
    pub fn pending(&self, direction: Direction) -> usize {
        self.queues.len(direction)
    }

    /// Stop the link and release the card
    ///
    /// Returns the number of queued buffers that were discarded.
    pub fn detach(mut self) -> usize {
        self.shutdown()
    }

    fn shutdown(&mut self) -> usize {
        let Some(Link {
            netdev,
            worker,
            irq,
        }) = self.link.take()
        else {
            return 0;
        };
        log::debug!("card: {}: detaching", self.device.name());

        self.queues.close();
        netdev.mark_surprise_removed();
        netdev.stop();
        drop(irq);
        let spu = worker.terminate();
        self.net.remove_card(netdev);
        // Releases chip-select and the bus
        drop(spu);
        self.device.teardown();

        let discarded = self.queues.drain();
        if discarded > 0 {
            log::info!("card: discarded {} queued buffers", discarded);
        }
        discarded
    }
}

impl<D: SpiDevice, N: NetStack> Drop for Card<D, N> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
