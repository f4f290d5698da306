//! List commands implementation

use crate::backends;
use libertas_spi_core::chip::CHIPS;

/// List all compiled-in backends
pub fn list_backends() {
    print!("{}", backends::backend_help());
}

/// List all supported chips
pub fn list_chips() {
    println!("Supported chips:");
    println!();
    println!(
        "{:<8} {:<8} {:<28} {:<28}",
        "Chip id", "Device", "Helper image", "Main image"
    );
    println!("{}", "-".repeat(74));

    for chip in CHIPS {
        let names = chip.firmware_names();
        println!(
            "{:<8} {:<8} {:<28} {:<28}",
            format!("0x{:02x}", chip.id),
            chip.device,
            names.helper,
            names.main
        );
    }
}
