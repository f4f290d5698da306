//! CLI argument parsing

use crate::backends;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Generate dynamic help text for the backend argument
fn backend_help() -> String {
    format!(
        "Backend to use [available: {}]",
        backends::backend_names_short()
    )
}

#[derive(Parser)]
#[command(name = "libertas-spi")]
#[command(author, version, about = "SPI link driver for Marvell libertas WLAN modules", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Bring up the link: load firmware if needed and service the card
    Attach {
        /// Backend to use
        #[arg(short, long, help = backend_help())]
        backend: String,

        /// Board file (TOML format)
        #[arg(long)]
        board: Option<PathBuf>,

        /// Directory holding the libertas/ firmware images
        #[arg(long)]
        firmware_dir: Option<PathBuf>,

        /// Detach after this many seconds instead of waiting for Ctrl-C
        #[arg(long)]
        duration: Option<u64>,
    },

    /// Identify the card without loading firmware
    Probe {
        /// Backend to use
        #[arg(short, long, help = backend_help())]
        backend: String,

        /// Board file (TOML format)
        #[arg(long)]
        board: Option<PathBuf>,
    },

    /// List supported chips and their firmware images
    ListChips,

    /// List compiled-in backends
    ListBackends,
}
