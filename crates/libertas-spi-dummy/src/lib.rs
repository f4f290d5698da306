//! libertas-spi-dummy - In-memory libertas card emulator for testing
//!
//! This crate emulates the SPU of a gspi card at the register level: the
//! boot ROM taking the helper image, the helper pulling the main image (with
//! optional CRC faults), and the running firmware exchanging commands, data
//! frames and events. It is useful for testing and development without real
//! hardware.

#![warn(missing_docs)]

mod emulator;

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use libertas_spi_core::error::Result;
use libertas_spi_core::{ChipSelect, InterruptBridge, PlatformData, SpiBus, SpiDevice};

pub use emulator::{BootState, EmulatedCard};

/// Configuration for the dummy card
#[derive(Debug, Clone)]
pub struct DummyConfig {
    /// Chip id reported in the device id register
    pub chip_id: u16,
    /// Chip revision reported in the device id register
    pub chip_rev: u8,
    /// Port settle delay reported in the delay register
    pub port_delay: u16,
    /// Register settle delay reported in the delay register
    pub reg_delay: u16,
    /// Start with the main firmware already running
    pub firmware_resident: bool,
    /// Size of the main image the helper pulls
    pub main_image_len: usize,
    /// Largest chunk the helper asks for
    pub main_chunk_len: u16,
    /// Main chunk writes (counting resends, from 0) to report as corrupt
    pub crc_error_chunks: Vec<usize>,
    /// Report every main chunk as corrupt
    pub always_crc_error: bool,
    /// Answer every command with a copy of itself
    pub echo_commands: bool,
    /// Board configuration handed to the core
    pub platform: Option<PlatformData>,
}

impl Default for DummyConfig {
    fn default() -> Self {
        Self {
            chip_id: 0x0b, // 8686
            chip_rev: 0x03,
            port_delay: 0x20,
            reg_delay: 0x40,
            firmware_resident: true,
            main_image_len: 0,
            main_chunk_len: 1024,
            crc_error_chunks: Vec::new(),
            always_crc_error: false,
            echo_commands: false,
            platform: Some(PlatformData {
                gpio_cs: 0,
                use_dummy_writes: false,
            }),
        }
    }
}

/// Shared handle to an [`EmulatedCard`]
#[derive(Clone)]
pub struct DummyCard(Arc<Mutex<EmulatedCard>>);

impl DummyCard {
    /// Power up a card with the given configuration
    pub fn new(config: DummyConfig) -> Self {
        Self(Arc::new(Mutex::new(EmulatedCard::new(config))))
    }

    /// Power up a card with firmware already running (chip 8686)
    pub fn new_default() -> Self {
        Self::new(DummyConfig::default())
    }

    /// Lock the card for inspection or fault injection
    pub fn lock(&self) -> MutexGuard<'_, EmulatedCard> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Board that attaches this card
    pub fn device(&self) -> DummyDevice {
        DummyDevice {
            platform: self.lock().config().platform,
            card: self.clone(),
        }
    }
}

/// SPI bus wired to the emulated SPU
pub struct DummyBus(DummyCard);

impl SpiBus for DummyBus {
    fn write(&mut self, data: &[u8]) -> Result<()> {
        self.0.lock().bus_write(data)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<()> {
        self.0.lock().bus_read(buf)
    }

    fn delay_us(&mut self, _us: u32) {
        // The emulated card never needs time to settle
        std::thread::yield_now();
    }
}

/// Chip-select line of the emulated SPU
pub struct DummyCs(DummyCard);

impl ChipSelect for DummyCs {
    fn set(&mut self, active: bool) -> Result<()> {
        self.0.lock().set_cs(active);
        Ok(())
    }
}

impl Drop for DummyCs {
    fn drop(&mut self) {
        self.0.lock().set_cs(false);
    }
}

/// Interrupt binding; unbinds when dropped
pub struct DummyIrq(DummyCard);

impl Drop for DummyIrq {
    fn drop(&mut self) {
        self.0.lock().unbind_irq();
    }
}

/// Board for the emulated card
pub struct DummyDevice {
    card: DummyCard,
    platform: Option<PlatformData>,
}

impl DummyDevice {
    /// The emulated card behind this board
    pub fn card(&self) -> &DummyCard {
        &self.card
    }
}

impl SpiDevice for DummyDevice {
    type Bus = DummyBus;
    type Cs = DummyCs;
    type Irq = DummyIrq;

    fn name(&self) -> &str {
        "dummy"
    }

    fn platform_data(&self) -> Option<&PlatformData> {
        self.platform.as_ref()
    }

    fn setup(&mut self) -> Result<()> {
        self.card.lock().power_up();
        Ok(())
    }

    fn teardown(&mut self) {
        self.card.lock().power_down();
    }

    fn open_bus(&mut self) -> Result<DummyBus> {
        Ok(DummyBus(self.card.clone()))
    }

    fn request_chip_select(&mut self, gpio: u32) -> Result<DummyCs> {
        log::debug!("dummy: chip-select on gpio {}", gpio);
        self.card.lock().set_cs(false);
        Ok(DummyCs(self.card.clone()))
    }

    fn request_irq(&mut self, bridge: InterruptBridge) -> Result<DummyIrq> {
        self.card.lock().bind_irq(bridge);
        Ok(DummyIrq(self.card.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use libertas_spi_core::error::Error;
    use libertas_spi_core::regs::SCRATCH_2;
    use libertas_spi_core::{
        Card, Direction, FirmwareProvider, NetDevice, NetStack, SpuTiming, Submitter, Upcalls,
        WorkerState,
    };
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    #[derive(Default)]
    struct Received {
        responses: Vec<Vec<u8>>,
        frames: Vec<Vec<u8>>,
        events: Vec<u8>,
        completions: usize,
        running: bool,
        surprise_removed: bool,
        removed: bool,
    }

    #[derive(Clone, Default)]
    struct RecordingNet(Arc<Mutex<Received>>);

    impl RecordingNet {
        fn get(&self) -> MutexGuard<'_, Received> {
            self.0.lock().unwrap()
        }
    }

    struct RecordingDev(Arc<Mutex<Received>>);

    impl Upcalls for RecordingDev {
        fn deliver_command_response(&self, response: &[u8]) -> Result<()> {
            self.0.lock().unwrap().responses.push(response.to_vec());
            Ok(())
        }

        fn deliver_received_packet(&self, frame: Vec<u8>) -> Result<()> {
            self.0.lock().unwrap().frames.push(frame);
            Ok(())
        }

        fn notify_prior_transfer_complete(&self, _direction: Direction) {
            self.0.lock().unwrap().completions += 1;
        }

        fn deliver_event(&self, cause: u8) {
            self.0.lock().unwrap().events.push(cause);
        }
    }

    impl NetDevice for RecordingDev {
        fn start(&self) -> Result<()> {
            self.0.lock().unwrap().running = true;
            Ok(())
        }

        fn stop(&self) {
            self.0.lock().unwrap().running = false;
        }

        fn mark_surprise_removed(&self) {
            self.0.lock().unwrap().surprise_removed = true;
        }
    }

    impl NetStack for RecordingNet {
        type Device = RecordingDev;

        fn add_card(&mut self, _submitter: Submitter) -> Result<RecordingDev> {
            Ok(RecordingDev(self.0.clone()))
        }

        fn remove_card(&mut self, _device: Arc<RecordingDev>) {
            self.get().removed = true;
        }
    }

    struct MapFirmware(HashMap<String, Vec<u8>>);

    impl MapFirmware {
        fn gspi8686(helper: &[u8], main: &[u8]) -> Self {
            Self(HashMap::from([
                ("libertas/gspi8686_hlp.bin".to_string(), helper.to_vec()),
                ("libertas/gspi8686.bin".to_string(), main.to_vec()),
            ]))
        }
    }

    impl FirmwareProvider for MapFirmware {
        fn load_image(&self, name: &str) -> Result<Vec<u8>> {
            self.0.get(name).cloned().ok_or(Error::FirmwareNotFound {
                name: name.to_string(),
                source: None,
            })
        }
    }

    fn timing() -> SpuTiming {
        SpuTiming {
            wait_timeout: Duration::from_millis(500),
            confirm_interval: Duration::from_millis(1),
            helper_chunk_delay: Duration::ZERO,
            ..SpuTiming::default()
        }
    }

    fn image(len: usize, seed: u8) -> Vec<u8> {
        (0..len).map(|i| (i as u8).wrapping_mul(31) ^ seed).collect()
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        cond()
    }

    fn booting_card(main_len: usize) -> DummyCard {
        DummyCard::new(DummyConfig {
            firmware_resident: false,
            main_image_len: main_len,
            main_chunk_len: 512,
            ..DummyConfig::default()
        })
    }

    #[test]
    fn test_attach_downloads_both_images() {
        let helper = image(200, 0x5a);
        let main = image(1500, 0xa5);
        let card = booting_card(main.len());
        let fw = MapFirmware::gspi8686(&helper, &main);
        let net = RecordingNet::default();

        let attached = Card::attach(card.device(), net.clone(), &fw, timing()).unwrap();
        assert!(!attached.info().firmware_resident);
        assert_eq!(attached.info().chip_id, 0x0b);
        assert_eq!(attached.info().port_delay, 0x20);
        assert_eq!(attached.info().reg_delay, 0x40);
        assert!(net.get().running);

        {
            let emu = card.lock();
            assert!(emu.is_running());
            assert_eq!(emu.helper_received().len(), 256);
            assert_eq!(&emu.helper_received()[..200], &helper[..]);
            assert!(emu.helper_received()[200..].iter().all(|&b| b == 0));
            assert_eq!(emu.main_received(), &main[..]);
            assert_eq!(emu.main_chunk_writes(), 1500usize.div_ceil(512));
            assert!(emu.irq_bound());
        }

        attached.detach();
    }

    #[test]
    fn test_crc_error_is_retried() {
        let main = image(1200, 0x11);
        let card = DummyCard::new(DummyConfig {
            firmware_resident: false,
            main_image_len: main.len(),
            main_chunk_len: 512,
            crc_error_chunks: vec![1, 2],
            ..DummyConfig::default()
        });
        let fw = MapFirmware::gspi8686(&image(64, 0), &main);

        let attached = Card::attach(card.device(), RecordingNet::default(), &fw, timing()).unwrap();
        {
            let emu = card.lock();
            assert_eq!(emu.main_received(), &main[..]);
            assert_eq!(emu.main_chunk_writes(), 3 + 2);
        }
        attached.detach();
    }

    #[test]
    fn test_persistent_crc_errors_fail_attach() {
        let card = DummyCard::new(DummyConfig {
            firmware_resident: false,
            main_image_len: 4096,
            always_crc_error: true,
            ..DummyConfig::default()
        });
        let fw = MapFirmware::gspi8686(&image(64, 0), &image(4096, 1));
        let net = RecordingNet::default();

        let err = Card::attach(card.device(), net.clone(), &fw, timing())
            .err()
            .unwrap();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(err.errno(), -5);

        let emu = card.lock();
        assert_eq!(emu.main_chunk_writes(), 6);
        assert!(!emu.cs_active());
        assert!(!emu.powered());
        assert_eq!(emu.power_cycles(), 1);
        assert!(!emu.irq_bound());
        assert!(!net.get().removed);
    }

    #[test]
    fn test_missing_firmware_fails_attach() {
        let card = booting_card(128);
        let fw = MapFirmware(HashMap::new());
        let err = Card::attach(card.device(), RecordingNet::default(), &fw, timing())
            .err()
            .unwrap();
        assert!(matches!(err, Error::FirmwareNotFound { .. }));
        assert_eq!(err.errno(), -2);
        assert!(!card.lock().powered());
    }

    #[test]
    fn test_unsupported_chip() {
        let card = DummyCard::new(DummyConfig {
            chip_id: 0x0c,
            firmware_resident: false,
            ..DummyConfig::default()
        });
        let err = Card::attach(
            card.device(),
            RecordingNet::default(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::UnsupportedChip(0x0c)));
        assert_eq!(err.errno(), -97);
    }

    #[test]
    fn test_resident_firmware_skips_download() {
        let card = DummyCard::new(DummyConfig {
            chip_id: 0x0c,
            ..DummyConfig::default()
        });
        let attached = Card::attach(
            card.device(),
            RecordingNet::default(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();
        assert!(attached.info().firmware_resident);
        assert_eq!(attached.info().firmware, None);
        assert!(card.lock().helper_received().is_empty());
        attached.detach();
    }

    #[test]
    fn test_missing_platform_data() {
        let card = DummyCard::new(DummyConfig {
            platform: None,
            ..DummyConfig::default()
        });
        let err = Card::attach(
            card.device(),
            RecordingNet::default(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, Error::NoPlatformData));
        assert_eq!(card.lock().power_cycles(), 0);
    }

    #[test]
    fn test_traffic_in_both_directions() {
        let card = DummyCard::new_default();
        let net = RecordingNet::default();
        let attached = Card::attach(
            card.device(),
            net.clone(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();
        let tx = attached.submitter().clone();

        for i in 1..=3u8 {
            tx.submit(Direction::Command, &[i; 6]).unwrap();
        }
        tx.submit(Direction::Data, &[0xee; 5]).unwrap();
        assert!(wait_until(|| {
            let emu = card.lock();
            emu.received_commands().len() == 3 && emu.received_frames().len() == 1
        }));
        {
            let emu = card.lock();
            assert_eq!(
                emu.received_commands(),
                &[
                    vec![1, 1, 1, 1, 1, 1, 0, 0],
                    vec![2, 2, 2, 2, 2, 2, 0, 0],
                    vec![3, 3, 3, 3, 3, 3, 0, 0]
                ]
            );
            assert_eq!(emu.received_frames(), &[vec![0xee, 0xee, 0xee, 0xee, 0xee, 0, 0, 0]]);
        }

        card.lock().push_command_response(&[0x80, 0x00, 0x07]);
        card.lock().push_rx_frame(&[1, 2, 3, 4, 5, 6, 7]);
        card.lock().push_event(0x0123);
        assert!(wait_until(|| {
            let rx = net.get();
            rx.responses.len() == 1 && rx.frames.len() == 1 && rx.events.len() == 1
        }));
        {
            let rx = net.get();
            assert_eq!(rx.responses[0], vec![0x80, 0x00, 0x07]);
            assert_eq!(rx.frames[0], vec![1, 2, 3, 4, 5, 6, 7]);
            assert_eq!(rx.events[0], 0x23);
            assert!(rx.completions > 0);
        }

        attached.detach();
    }

    #[test]
    fn test_failed_branch_does_not_block_others() {
        let card = DummyCard::new_default();
        let net = RecordingNet::default();
        let attached = Card::attach(
            card.device(),
            net.clone(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();

        {
            let mut emu = card.lock();
            emu.fail_reads(SCRATCH_2);
            emu.push_command_response(&[9, 9]);
            emu.push_rx_frame(&[4, 3, 2, 1]);
            emu.push_event(0x42);
        }
        assert!(wait_until(|| {
            let rx = net.get();
            rx.frames.len() == 1 && rx.events.len() == 1
        }));
        assert!(net.get().responses.is_empty());

        // The response is still pending and goes up once reads work again
        card.lock().clear_read_faults();
        card.lock().push_event(0x43);
        assert!(wait_until(|| net.get().responses.len() == 1));
        assert!(wait_until(
            || attached.worker_state() == WorkerState::WaitingForWork
        ));

        attached.detach();
    }

    #[test]
    fn test_detach_releases_everything() {
        let card = DummyCard::new_default();
        let net = RecordingNet::default();
        let attached = Card::attach(
            card.device(),
            net.clone(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();
        assert!(card.lock().powered());

        let discarded = attached.detach();
        assert_eq!(discarded, 0);

        let rx = net.get();
        assert!(rx.surprise_removed);
        assert!(!rx.running);
        assert!(rx.removed);
        let emu = card.lock();
        assert!(!emu.irq_bound());
        assert!(!emu.cs_active());
        assert!(!emu.powered());
        assert_eq!(emu.power_cycles(), 1);
    }

    #[test]
    fn test_drop_detaches() {
        let card = DummyCard::new_default();
        let net = RecordingNet::default();
        let attached = Card::attach(
            card.device(),
            net.clone(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();
        drop(attached);
        assert!(net.get().removed);
        assert_eq!(card.lock().power_cycles(), 1);
    }

    #[test]
    fn test_dummy_write_mode() {
        let card = DummyCard::new(DummyConfig {
            platform: Some(PlatformData {
                gpio_cs: 7,
                use_dummy_writes: true,
            }),
            ..DummyConfig::default()
        });
        let attached = Card::attach(
            card.device(),
            RecordingNet::default(),
            &MapFirmware(HashMap::new()),
            timing(),
        )
        .unwrap();
        assert!(attached.info().use_dummy_writes);
        assert_eq!(
            card.lock().reg(libertas_spi_core::regs::SPU_BUS_MODE),
            u32::from(libertas_spi_core::regs::BusMode::dummy_clock().bits())
        );
        attached.detach();
    }
}
