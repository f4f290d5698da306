//! Linux board: spidev bus plus GPIO chip-select, interrupt and reset lines

use crate::error::{LinuxSpiError, Result};
use crate::gpio::{GpioChipSelect, GpioInterrupt, GpioReset};
use crate::spi::{LinuxSpiBus, LinuxSpiConfig};

use gpiocdev::line::Offset;

use libertas_spi_core::error::Result as CoreResult;
use libertas_spi_core::{InterruptBridge, PlatformData, SpiDevice};

use std::time::Duration;

/// Default GPIO chip
const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";

/// Reset pulse width and settle time after release
const RESET_DELAY: Duration = Duration::from_millis(10);

/// Everything needed to reach one card
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinuxBoardConfig {
    /// spidev settings
    pub spi: LinuxSpiConfig,
    /// GPIO chip holding the chip-select, interrupt and reset lines
    pub gpio_chip: String,
    /// Interrupt line offset
    pub irq_line: Option<Offset>,
    /// Reset line offset, if the board wires one
    pub reset_line: Option<Offset>,
    /// Board configuration handed to the core
    pub platform: Option<PlatformData>,
}

impl Default for LinuxBoardConfig {
    fn default() -> Self {
        Self {
            spi: LinuxSpiConfig::default(),
            gpio_chip: DEFAULT_GPIO_CHIP.to_string(),
            irq_line: None,
            reset_line: None,
            platform: None,
        }
    }
}

/// Card wired to a Linux SPI controller and GPIO chip
pub struct LinuxBoard {
    config: LinuxBoardConfig,
    name: String,
    reset: Option<GpioReset>,
}

impl LinuxBoard {
    /// Create a board; nothing is opened until the card is attached
    pub fn new(config: LinuxBoardConfig) -> Self {
        let name = format!("linux_spi:{}", config.spi.device);
        Self {
            config,
            name,
            reset: None,
        }
    }
}

impl SpiDevice for LinuxBoard {
    type Bus = LinuxSpiBus;
    type Cs = GpioChipSelect;
    type Irq = GpioInterrupt;

    fn name(&self) -> &str {
        &self.name
    }

    fn platform_data(&self) -> Option<&PlatformData> {
        self.config.platform.as_ref()
    }

    fn setup(&mut self) -> CoreResult<()> {
        let Some(line) = self.config.reset_line else {
            return Ok(());
        };
        let reset = GpioReset::open(&self.config.gpio_chip, line)?;
        std::thread::sleep(RESET_DELAY);
        reset.set(false)?;
        std::thread::sleep(RESET_DELAY);
        log::debug!("linux_spi: card released from reset (line {})", line);
        self.reset = Some(reset);
        Ok(())
    }

    fn teardown(&mut self) {
        if let Some(reset) = self.reset.take() {
            if let Err(e) = reset.set(true) {
                log::warn!("linux_spi: failed to put card into reset: {}", e);
            }
        }
    }

    fn open_bus(&mut self) -> CoreResult<LinuxSpiBus> {
        Ok(LinuxSpiBus::open(&self.config.spi)?)
    }

    fn request_chip_select(&mut self, gpio: u32) -> CoreResult<GpioChipSelect> {
        Ok(GpioChipSelect::open(&self.config.gpio_chip, gpio)?)
    }

    fn request_irq(&mut self, bridge: InterruptBridge) -> CoreResult<GpioInterrupt> {
        let line = self.config.irq_line.ok_or_else(|| {
            LinuxSpiError::InvalidParameter("no interrupt line configured (irq=N)".into())
        })?;
        Ok(GpioInterrupt::bind(&self.config.gpio_chip, line, bridge)?)
    }
}

fn parse_line(key: &str, value: &str) -> std::result::Result<Offset, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid {} line: {}", key, value))
}

fn parse_bool(key: &str, value: &str) -> std::result::Result<bool, String> {
    match value {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        _ => Err(format!("Invalid {} value: {}", key, value)),
    }
}

/// Parse backend options from a list of key-value pairs
///
/// - `dev=/dev/spidev0.0` - Required: device path
/// - `spispeed=8000` - Optional: speed in kHz
/// - `mode=0` - Optional: SPI mode 0-3
/// - `gpiochip=/dev/gpiochip0` - Optional: GPIO chip for the lines below
/// - `cs=N` - Required: chip-select line
/// - `irq=N` - Required: interrupt line
/// - `reset=N` - Optional: reset line
/// - `dummy_writes=yes` - Optional: settle reads with dummy clocks
pub fn parse_options(options: &[(&str, &str)]) -> std::result::Result<LinuxBoardConfig, String> {
    let mut config = LinuxBoardConfig::default();
    let mut cs = None;
    let mut use_dummy_writes = false;

    for (key, value) in options {
        match *key {
            "dev" => {
                config.spi.device = value.to_string();
            }
            "spispeed" => {
                let speed_khz: u32 = value
                    .parse()
                    .map_err(|_| format!("Invalid spispeed value: {}", value))?;
                config.spi.speed_hz = speed_khz * 1000;
            }
            "mode" => {
                let mode: u8 = value
                    .parse()
                    .map_err(|_| format!("Invalid mode value: {}", value))?;
                if mode > 3 {
                    return Err(format!("Invalid SPI mode: {} (must be 0-3)", mode));
                }
                config.spi.mode = mode;
            }
            "gpiochip" => {
                config.gpio_chip = value.to_string();
            }
            "cs" => cs = Some(parse_line(key, value)?),
            "irq" => config.irq_line = Some(parse_line(key, value)?),
            "reset" => config.reset_line = Some(parse_line(key, value)?),
            "dummy_writes" => use_dummy_writes = parse_bool(key, value)?,
            _ => {
                log::warn!("linux_spi: Unknown option: {}={}", key, value);
            }
        }
    }

    if config.spi.device.is_empty() {
        return Err("No device specified. Use dev=/dev/spidevX.Y".to_string());
    }
    config.platform = cs.map(|gpio_cs| PlatformData {
        gpio_cs,
        use_dummy_writes,
    });

    Ok(config)
}
