//! GPIO character device lines: chip-select, interrupt and reset
//!
//! Lines are requested through gpiocdev with the physical level spelled out:
//! `Value::Active` is a high line, `Value::Inactive` a low one.

use crate::error::{LinuxSpiError, Result};

use gpiocdev::line::{EdgeDetection, Offset, Value};
use gpiocdev::request::{Config, Request};

use libertas_spi_core::error::Result as CoreResult;
use libertas_spi_core::{ChipSelect, InterruptBridge};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// Consumer label shown by `gpioinfo`
const CONSUMER: &str = "libertas-spi";

/// Name of the interrupt watcher thread
const WATCHER_THREAD_NAME: &str = "lbs_spi_irq";

/// How often the watcher checks for shutdown while no edge arrives
const WATCH_POLL: Duration = Duration::from_millis(50);

fn request_line(chip: &str, line: Offset, config: Config) -> Result<Request> {
    Request::from_config(config)
        .on_chip(chip)
        .with_consumer(CONSUMER)
        .request()
        .map_err(|source| LinuxSpiError::LineRequestFailed {
            chip: chip.to_string(),
            line,
            source,
        })
}

/// Active-low chip-select output
pub struct GpioChipSelect {
    request: Request,
    line: Offset,
}

impl GpioChipSelect {
    /// Claim `line` on `chip`, driven high (idle)
    pub fn open(chip: &str, line: Offset) -> Result<Self> {
        let mut config = Config::default();
        config.with_line(line).as_output(Value::Active);
        let request = request_line(chip, line, config)?;
        log::debug!("linux_gpio: chip-select on {} line {}", chip, line);
        Ok(Self { request, line })
    }
}

impl ChipSelect for GpioChipSelect {
    fn set(&mut self, active: bool) -> CoreResult<()> {
        let level = if active {
            Value::Inactive
        } else {
            Value::Active
        };
        self.request
            .set_value(self.line, level)
            .map_err(LinuxSpiError::SetValueFailed)?;
        Ok(())
    }
}

/// Falling-edge interrupt line forwarded to an [`InterruptBridge`]
///
/// A watcher thread waits for edge events and calls the bridge for each
/// batch. Dropping the binding stops the thread and waits for it, so no
/// interrupt reaches the bridge afterwards.
pub struct GpioInterrupt {
    stop: Arc<AtomicBool>,
    watcher: Option<JoinHandle<()>>,
}

impl GpioInterrupt {
    /// Claim `line` on `chip` and start forwarding falling edges to `bridge`
    pub fn bind(chip: &str, line: Offset, bridge: InterruptBridge) -> Result<Self> {
        let mut config = Config::default();
        config
            .with_line(line)
            .as_input()
            .with_edge_detection(EdgeDetection::FallingEdge);
        let request = request_line(chip, line, config)?;

        let stop = Arc::new(AtomicBool::new(false));
        let watcher_stop = stop.clone();
        let watcher = std::thread::Builder::new()
            .name(WATCHER_THREAD_NAME.into())
            .spawn(move || watch(request, bridge, watcher_stop))
            .map_err(LinuxSpiError::WatcherSpawnFailed)?;

        log::debug!("linux_gpio: interrupt on {} line {}", chip, line);
        Ok(Self {
            stop,
            watcher: Some(watcher),
        })
    }
}

fn watch(request: Request, bridge: InterruptBridge, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Acquire) {
        match request.wait_edge_event(WATCH_POLL) {
            Ok(true) => {
                // Drain everything pending; one wake covers all of it
                loop {
                    if let Err(e) = request.read_edge_event() {
                        log::error!("linux_gpio: reading edge event failed: {}", e);
                        break;
                    }
                    match request.has_edge_event() {
                        Ok(true) => continue,
                        _ => break,
                    }
                }
                log::trace!("linux_gpio: interrupt");
                bridge.on_interrupt();
            }
            Ok(false) => {}
            Err(e) => {
                log::error!("linux_gpio: waiting for edge failed: {}", e);
                break;
            }
        }
    }
    log::debug!("linux_gpio: interrupt watcher stopped");
}

impl Drop for GpioInterrupt {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(watcher) = self.watcher.take() {
            if watcher.join().is_err() {
                log::error!("linux_gpio: interrupt watcher panicked");
            }
        }
    }
}

/// Active-low reset output, held low while the card is detached
pub struct GpioReset {
    request: Request,
    line: Offset,
}

impl GpioReset {
    /// Claim `line` on `chip` with the card held in reset
    pub fn open(chip: &str, line: Offset) -> Result<Self> {
        let mut config = Config::default();
        config.with_line(line).as_output(Value::Inactive);
        let request = request_line(chip, line, config)?;
        Ok(Self { request, line })
    }

    /// Drive the reset line; `true` holds the card in reset
    pub fn set(&self, asserted: bool) -> Result<()> {
        let level = if asserted {
            Value::Inactive
        } else {
            Value::Active
        };
        self.request
            .set_value(self.line, level)
            .map_err(LinuxSpiError::SetValueFailed)?;
        Ok(())
    }
}
