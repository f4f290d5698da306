//! CLI command implementations
//!
//! Commands are generic over the board type; `main` picks the concrete board
//! with [`crate::backends::with_board`].

pub mod attach;
mod list;
pub mod probe;

pub use list::{list_backends, list_chips};

use libertas_spi_core::CardInfo;

/// Print what is known about a card
pub fn print_card_info(board: &str, info: &CardInfo) {
    println!("Card Information");
    println!("================");
    println!();
    println!("Board:           {}", board);
    println!("Chip id:         0x{:02x}", info.chip_id);
    println!("Revision:        0x{:02x}", info.chip_rev);
    match &info.firmware {
        Some(names) => {
            println!("Helper image:    {}", names.helper);
            println!("Main image:      {}", names.main);
        }
        None => println!("Firmware:        unknown chip, no image names"),
    }
    println!(
        "Firmware state:  {}",
        if info.firmware_resident {
            "already running"
        } else {
            "not loaded"
        }
    );
    println!("Port delay:      0x{:04x}", info.port_delay);
    println!("Register delay:  0x{:04x}", info.reg_delay);
    println!(
        "Read settle:     {}",
        if info.use_dummy_writes {
            "dummy writes"
        } else {
            "timed"
        }
    );
}
