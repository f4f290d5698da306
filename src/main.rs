//! libertas-spi - SPI link driver for Marvell libertas WLAN modules
//!
//! Drives 8385 and 8686 (gspi) cards over SPI: identifies the chip, loads
//! the helper and main firmware, then services the card's interrupts and
//! moves commands, frames and events between the card and a network stack.
//!
//! # Architecture
//!
//! The driver core (`libertas-spi-core`) is board independent. A board
//! supplies the SPI bus, the chip-select GPIO and the interrupt line:
//! - **linux_spi** - `/dev/spidevX.Y` plus lines on a `/dev/gpiochipN`
//! - **dummy** - an in-memory emulation of the card, for testing
//!
//! The CLI runs the link with a logging network stack in place of a real
//! one.

mod backends;
mod cli;
mod commands;
mod config;
mod upper;

use backends::with_board;
use clap::Parser;
use cli::{Cli, Commands};
use config::BoardFile;
use libertas_spi_core::firmware::DEFAULT_FIRMWARE_DIR;
use libertas_spi_core::SpuTiming;

use std::path::{Path, PathBuf};
use std::time::Duration;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let result = match cli.command {
        Commands::Attach {
            backend,
            board,
            firmware_dir,
            duration,
        } => {
            let board_file = load_board_file(board.as_deref())?;
            let timing = board_timing(board_file.as_ref());
            let firmware_dir = firmware_dir
                .or_else(|| {
                    board_file
                        .as_ref()
                        .and_then(|b| b.firmware_dir())
                        .map(Path::to_path_buf)
                })
                .unwrap_or_else(|| PathBuf::from(DEFAULT_FIRMWARE_DIR));
            let duration = duration.map(Duration::from_secs);

            let board = backends::open_board(&backend, board_file.as_ref())?;
            with_board!(board, device => {
                commands::attach::run_attach(device, &firmware_dir, timing, duration)
            })
        }
        Commands::Probe { backend, board } => {
            let board_file = load_board_file(board.as_deref())?;
            let timing = board_timing(board_file.as_ref());
            let board = backends::open_board(&backend, board_file.as_ref())?;
            with_board!(board, device => commands::probe::run_probe(device, timing))
        }
        Commands::ListChips => {
            commands::list_chips();
            Ok(())
        }
        Commands::ListBackends => {
            commands::list_backends();
            Ok(())
        }
    };

    // A driver failure exits with its errno, as a failed attach would report it
    if let Err(e) = &result {
        if let Some(err) = e.downcast_ref::<libertas_spi_core::Error>() {
            eprintln!("Error: {}", err);
            std::process::exit(err.errno().saturating_neg());
        }
    }

    result
}

fn load_board_file(path: Option<&Path>) -> Result<Option<BoardFile>, Box<dyn std::error::Error>> {
    match path {
        Some(path) => Ok(Some(BoardFile::from_toml_file(path)?)),
        None => Ok(None),
    }
}

fn board_timing(board: Option<&BoardFile>) -> SpuTiming {
    board.map_or_else(SpuTiming::default, BoardFile::timing)
}
