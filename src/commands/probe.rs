//! Probe command implementation

use libertas_spi_core::{probe, Error, SpiDevice, SpuTiming};

/// Identify the card on `device` and print what was found
///
/// An unsupported chip is still printed, then reported as an error.
pub fn run_probe<D: SpiDevice>(
    mut device: D,
    timing: SpuTiming,
) -> Result<(), Box<dyn std::error::Error>> {
    let name = device.name().to_string();
    let info = probe(&mut device, timing)?;
    super::print_card_info(&name, &info);
    if !info.is_supported() {
        return Err(Error::UnsupportedChip(info.chip_id).into());
    }
    Ok(())
}
