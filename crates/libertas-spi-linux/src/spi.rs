//! spidev bus
//!
//! The SPU is clocked in 16-bit words, so the device is configured with
//! 16 bits per word and the kernel's native chip-select is disabled: the
//! transaction unit holds the GPIO chip-select across several transfers.

use crate::error::{LinuxSpiError, Result};

use libertas_spi_core::error::Result as CoreResult;
use libertas_spi_core::SpiBus;

use std::fs::{File, OpenOptions};
use std::os::unix::io::AsRawFd;

/// Path to kernel spidev buffer size parameter
const BUF_SIZE_SYSFS: &str = "/sys/module/spidev/parameters/bufsiz";

/// Default SPI clock speed in Hz (8 MHz)
const DEFAULT_SPEED_HZ: u32 = 8_000_000;

/// Word size the SPU is clocked with
const BITS_PER_WORD: u8 = 16;

/// SPI mode constants
pub mod mode {
    /// SPI mode 0: CPOL=0, CPHA=0
    pub const MODE_0: u8 = 0;
    /// SPI mode 1: CPOL=0, CPHA=1
    pub const MODE_1: u8 = 1;
    /// SPI mode 2: CPOL=1, CPHA=0
    pub const MODE_2: u8 = 2;
    /// SPI mode 3: CPOL=1, CPHA=1
    pub const MODE_3: u8 = 3;
    /// Controller does not drive chip-select
    pub const NO_CS: u8 = 0x40;
}

/// Linux spidev ioctl constants
mod ioctl {
    use nix::ioctl_write_ptr;

    const SPI_IOC_MAGIC: u8 = b'k';

    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    ioctl_write_ptr!(spi_ioc_wr_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    ioctl_write_ptr!(
        spi_ioc_wr_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    ioctl_write_ptr!(
        spi_ioc_wr_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );

    /// Size of struct spi_ioc_transfer
    pub const SPI_IOC_TRANSFER_SIZE: usize = 32;

    /// SPI_IOC_MESSAGE(n) = _IOW(SPI_IOC_MAGIC, 0, char[n * sizeof(spi_ioc_transfer)])
    pub fn spi_ioc_message(n: u8) -> libc::c_ulong {
        let size = (n as usize) * SPI_IOC_TRANSFER_SIZE;
        ((1u32 << 30) | ((size as u32) << 16) | ((SPI_IOC_MAGIC as u32) << 8)) as libc::c_ulong
    }
}

/// Must match the kernel's struct spi_ioc_transfer layout
#[repr(C)]
#[derive(Debug, Default, Clone)]
struct SpiIocTransfer {
    tx_buf: u64,
    rx_buf: u64,
    len: u32,
    speed_hz: u32,
    delay_usecs: u16,
    bits_per_word: u8,
    cs_change: u8,
    tx_nbits: u8,
    rx_nbits: u8,
    word_delay_usecs: u8,
    _pad: u8,
}

/// Configuration for opening a spidev device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxSpiConfig {
    /// Device path (e.g., "/dev/spidev0.0")
    pub device: String,
    /// SPI clock speed in Hz (default: 8 MHz)
    pub speed_hz: u32,
    /// SPI mode (0-3, default: 0)
    pub mode: u8,
}

impl Default for LinuxSpiConfig {
    fn default() -> Self {
        Self {
            device: String::new(),
            speed_hz: DEFAULT_SPEED_HZ,
            mode: mode::MODE_0,
        }
    }
}

impl LinuxSpiConfig {
    /// Create a new configuration with the given device path
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            ..Default::default()
        }
    }
}

/// SPU bus on a `/dev/spidevX.Y` device
pub struct LinuxSpiBus {
    file: File,
    /// Largest single transfer the kernel accepts, in bytes
    max_transfer: usize,
    speed_hz: u32,
}

impl LinuxSpiBus {
    /// Open and configure a spidev device
    pub fn open(config: &LinuxSpiConfig) -> Result<Self> {
        if config.device.is_empty() {
            return Err(LinuxSpiError::NoDevice);
        }

        log::debug!("linux_spi: Opening device {}", config.device);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&config.device)
            .map_err(|e| LinuxSpiError::OpenFailed {
                path: config.device.clone(),
                source: e,
            })?;

        let fd = file.as_raw_fd();

        let mode = config.mode | mode::NO_CS;
        unsafe {
            ioctl::spi_ioc_wr_mode(fd, &mode).map_err(|e| LinuxSpiError::SetModeFailed {
                mode,
                source: std::io::Error::from_raw_os_error(e as i32),
            })?;
        }

        let bits = BITS_PER_WORD;
        unsafe {
            ioctl::spi_ioc_wr_bits_per_word(fd, &bits).map_err(|e| {
                LinuxSpiError::SetBitsPerWordFailed {
                    bits,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        let speed = config.speed_hz;
        unsafe {
            ioctl::spi_ioc_wr_max_speed_hz(fd, &speed).map_err(|e| {
                LinuxSpiError::SetSpeedFailed {
                    speed,
                    source: std::io::Error::from_raw_os_error(e as i32),
                }
            })?;
        }

        log::info!(
            "linux_spi: Opened {} (mode={}, speed={} kHz, {} bits per word)",
            config.device,
            config.mode,
            speed / 1000,
            bits
        );

        // Whole words only
        let max_transfer = get_max_kernel_buf_size() & !1;
        log::debug!("linux_spi: Max transfer size: {} bytes", max_transfer);

        Ok(Self {
            file,
            max_transfer,
            speed_hz: speed,
        })
    }

    /// One SPI_IOC_MESSAGE transfer, either transmit or receive
    fn transfer(&mut self, tx: Option<&[u8]>, rx: Option<&mut [u8]>) -> Result<()> {
        let mut xfer = SpiIocTransfer {
            speed_hz: self.speed_hz,
            bits_per_word: BITS_PER_WORD,
            ..Default::default()
        };
        if let Some(tx) = tx {
            xfer.tx_buf = tx.as_ptr() as u64;
            xfer.len = tx.len() as u32;
        }
        if let Some(rx) = rx {
            xfer.rx_buf = rx.as_mut_ptr() as u64;
            xfer.len = rx.len() as u32;
        }

        let fd = self.file.as_raw_fd();
        let ret = unsafe { libc::ioctl(fd, ioctl::spi_ioc_message(1), &xfer) };
        if ret < 0 {
            return Err(LinuxSpiError::TransferFailed(
                std::io::Error::last_os_error(),
            ));
        }
        Ok(())
    }

    fn check_words(len: usize) -> Result<()> {
        if len % 2 != 0 {
            return Err(LinuxSpiError::OddLength(len));
        }
        Ok(())
    }
}

impl SpiBus for LinuxSpiBus {
    fn write(&mut self, data: &[u8]) -> CoreResult<()> {
        Self::check_words(data.len())?;
        for chunk in data.chunks(self.max_transfer) {
            self.transfer(Some(chunk), None)?;
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> CoreResult<()> {
        Self::check_words(buf.len())?;
        let max = self.max_transfer;
        for chunk in buf.chunks_mut(max) {
            self.transfer(None, Some(chunk))?;
        }
        Ok(())
    }
}

/// Read the maximum kernel buffer size from sysfs, or use page size as fallback
fn get_max_kernel_buf_size() -> usize {
    if let Ok(content) = std::fs::read_to_string(BUF_SIZE_SYSFS) {
        if let Ok(size) = content.trim().parse::<usize>() {
            if size > 1 {
                log::debug!("linux_spi: Using buffer size {} from sysfs", size);
                return size;
            }
        }
        log::warn!("linux_spi: Invalid buffer size in {}", BUF_SIZE_SYSFS);
    } else {
        log::debug!("linux_spi: Cannot read {}, using page size", BUF_SIZE_SYSFS);
    }

    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) } as usize;
    log::debug!("linux_spi: Using page size {} as buffer size", page_size);
    page_size
}
