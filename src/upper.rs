//! Logging network stack
//!
//! Stands in for a real network stack: everything the card sends up is
//! logged and counted, and nothing is sent down unless asked to.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use libertas_spi_core::error::Result;
use libertas_spi_core::{Direction, NetDevice, NetStack, Submitter, Upcalls};

/// Format bytes as space-separated hex, truncated after `max` bytes
fn hex_preview(bytes: &[u8], max: usize) -> String {
    let mut s: Vec<String> = bytes.iter().take(max).map(|b| format!("{:02x}", b)).collect();
    if bytes.len() > max {
        s.push("..".to_string());
    }
    s.join(" ")
}

/// Traffic counters of one card
#[derive(Debug, Default)]
pub struct Counters {
    pub responses: AtomicUsize,
    pub frames: AtomicUsize,
    pub frame_bytes: AtomicUsize,
    pub events: AtomicUsize,
    pub completions: AtomicUsize,
}

/// Device registered for each card
pub struct LoggingDevice {
    counters: Arc<Counters>,
    /// Outbound path; this stack never sends anything itself
    _submitter: Submitter,
}

impl Upcalls for LoggingDevice {
    fn deliver_command_response(&self, response: &[u8]) -> Result<()> {
        self.counters.responses.fetch_add(1, Ordering::Relaxed);
        log::info!(
            "upper: command response ({} bytes): {}",
            response.len(),
            hex_preview(response, 16)
        );
        Ok(())
    }

    fn deliver_received_packet(&self, frame: Vec<u8>) -> Result<()> {
        self.counters.frames.fetch_add(1, Ordering::Relaxed);
        self.counters
            .frame_bytes
            .fetch_add(frame.len(), Ordering::Relaxed);
        log::debug!(
            "upper: frame ({} bytes): {}",
            frame.len(),
            hex_preview(&frame, 16)
        );
        Ok(())
    }

    fn notify_prior_transfer_complete(&self, direction: Direction) {
        self.counters.completions.fetch_add(1, Ordering::Relaxed);
        log::trace!("upper: {} download complete", direction);
    }

    fn deliver_event(&self, cause: u8) {
        self.counters.events.fetch_add(1, Ordering::Relaxed);
        log::info!("upper: card event 0x{:02x}", cause);
    }
}

impl NetDevice for LoggingDevice {
    fn start(&self) -> Result<()> {
        log::info!("upper: interface up");
        Ok(())
    }

    fn stop(&self) {
        log::info!("upper: interface down");
    }

    fn mark_surprise_removed(&self) {
        log::debug!("upper: card removed");
    }
}

/// Stack that creates a [`LoggingDevice`] per card
#[derive(Default)]
pub struct LoggingStack {
    counters: Arc<Counters>,
}

impl LoggingStack {
    /// Counters shared with the devices this stack creates
    pub fn counters(&self) -> Arc<Counters> {
        self.counters.clone()
    }
}

impl NetStack for LoggingStack {
    type Device = LoggingDevice;

    fn add_card(&mut self, submitter: Submitter) -> Result<LoggingDevice> {
        log::debug!("upper: card registered");
        Ok(LoggingDevice {
            counters: self.counters.clone(),
            _submitter: submitter,
        })
    }

    fn remove_card(&mut self, _device: Arc<LoggingDevice>) {
        let c = &self.counters;
        log::info!(
            "upper: card unregistered ({} responses, {} frames / {} bytes, {} events)",
            c.responses.load(Ordering::Relaxed),
            c.frames.load(Ordering::Relaxed),
            c.frame_bytes.load(Ordering::Relaxed),
            c.events.load(Ordering::Relaxed)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_preview() {
        assert_eq!(hex_preview(&[0x80, 0x00, 0x07], 16), "80 00 07");
        assert_eq!(hex_preview(&[1, 2, 3], 2), "01 02 ..");
        assert_eq!(hex_preview(&[], 4), "");
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_counts_traffic_from_emulated_card() {
        use libertas_spi_core::{Card, DirFirmware, SpuTiming};
        use libertas_spi_dummy::DummyCard;

        let card = DummyCard::new_default();
        let stack = LoggingStack::default();
        let counters = stack.counters();
        let attached = Card::attach(
            card.device(),
            stack,
            &DirFirmware::default(),
            SpuTiming::default(),
        )
        .unwrap();

        card.lock().push_event(0x11);
        card.lock().push_rx_frame(&[1, 2, 3, 4, 5]);
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while (counters.events.load(Ordering::Relaxed) == 0
            || counters.frames.load(Ordering::Relaxed) == 0)
            && std::time::Instant::now() < deadline
        {
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        attached.detach();

        assert_eq!(counters.events.load(Ordering::Relaxed), 1);
        assert_eq!(counters.frames.load(Ordering::Relaxed), 1);
        assert_eq!(counters.frame_bytes.load(Ordering::Relaxed), 5);
    }
}
