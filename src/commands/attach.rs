//! Attach command implementation

use std::path::Path;
use std::sync::mpsc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use libertas_spi_core::{Card, DirFirmware, LoadProgress, SpiDevice, SpuTiming, Stage};

use crate::upper::LoggingStack;

/// Firmware download progress rendered with indicatif
#[derive(Default)]
struct DownloadProgress {
    bar: Option<ProgressBar>,
}

impl LoadProgress for DownloadProgress {
    fn started(&mut self, stage: Stage, total_bytes: usize) {
        let pb = ProgressBar::new(total_bytes as u64);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} {msg:6} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        pb.set_message(stage.to_string());
        self.bar = Some(pb);
    }

    fn progress(&mut self, _stage: Stage, bytes_sent: usize) {
        if let Some(pb) = &self.bar {
            pb.set_position(bytes_sent as u64);
        }
    }

    fn finished(&mut self, stage: Stage) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message(format!("{} ok", stage));
        }
    }
}

/// Attach the card on `device`, service it until Ctrl-C or `duration`, then
/// detach
pub fn run_attach<D: SpiDevice>(
    device: D,
    firmware_dir: &Path,
    timing: SpuTiming,
    duration: Option<Duration>,
) -> Result<(), Box<dyn std::error::Error>> {
    let (stop_tx, stop_rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = stop_tx.send(());
    })?;

    let name = device.name().to_string();
    let firmware = DirFirmware::new(firmware_dir);
    let mut progress = DownloadProgress::default();

    log::info!("Attaching {} (firmware from {})", name, firmware_dir.display());
    let card = Card::attach_with_progress(
        device,
        LoggingStack::default(),
        &firmware,
        timing,
        &mut progress,
    )?;
    super::print_card_info(&name, card.info());
    println!();

    match duration {
        Some(d) => {
            println!("Link up for {} s, Ctrl-C to stop early", d.as_secs());
            // Either outcome ends the session
            let _ = stop_rx.recv_timeout(d);
        }
        None => {
            println!("Link up, Ctrl-C to stop");
            let _ = stop_rx.recv();
        }
    }

    log::info!("Detaching {}", name);
    let discarded = card.detach();
    if discarded > 0 {
        println!("Discarded {} queued buffers", discarded);
    }
    println!("Detached");
    Ok(())
}
