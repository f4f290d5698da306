//! Firmware image sources and download progress reporting

use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Default firmware root, as on a Linux system
pub const DEFAULT_FIRMWARE_DIR: &str = "/lib/firmware";

/// Source of firmware images
pub trait FirmwareProvider {
    /// Load the image called `name` (e.g. `libertas/gspi8686.bin`)
    fn load_image(&self, name: &str) -> Result<Vec<u8>>;
}

impl<F: FirmwareProvider + ?Sized> FirmwareProvider for &F {
    fn load_image(&self, name: &str) -> Result<Vec<u8>> {
        (**self).load_image(name)
    }
}

/// Firmware provider that resolves names relative to a directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirFirmware {
    root: PathBuf,
}

impl DirFirmware {
    /// Serve images from `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory images are loaded from
    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl Default for DirFirmware {
    fn default() -> Self {
        Self::new(DEFAULT_FIRMWARE_DIR)
    }
}

impl FirmwareProvider for DirFirmware {
    fn load_image(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.root.join(name);
        log::debug!("fw: loading {}", path.display());
        std::fs::read(&path).map_err(|e| {
            if e.kind() != IoErrorKind::NotFound {
                log::error!("fw: failed to read {}: {}", path.display(), e);
            }
            Error::FirmwareNotFound {
                name: name.to_string(),
                source: Some(e),
            }
        })
    }
}

/// Download stage reported to a [`LoadProgress`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Helper image, pushed in fixed chunks to the boot ROM
    Helper,
    /// Main image, pulled by the helper in device-sized chunks
    Main,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Helper => write!(f, "helper"),
            Stage::Main => write!(f, "main"),
        }
    }
}

/// Callback for progress reporting during the firmware download
pub trait LoadProgress {
    /// Called when a stage starts with the size of its image
    fn started(&mut self, stage: Stage, total_bytes: usize);

    /// Called after each chunk the device accepted
    fn progress(&mut self, stage: Stage, bytes_sent: usize);

    /// Called when the stage has been confirmed
    fn finished(&mut self, stage: Stage);
}

/// A no-op progress reporter
pub struct NoProgress;

impl LoadProgress for NoProgress {
    fn started(&mut self, _stage: Stage, _total_bytes: usize) {}
    fn progress(&mut self, _stage: Stage, _bytes_sent: usize) {}
    fn finished(&mut self, _stage: Stage) {}
}
