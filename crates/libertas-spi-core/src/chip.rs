//! Chip identity table
//!
//! Maps the chip id read from the device id register to the device number
//! used in firmware image names.

use crate::error::{Error, Result};

/// Firmware family prefix shared by all gspi parts
pub const FIRMWARE_FAMILY: &str = "libertas/gspi";

/// Supported chip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipModel {
    /// Chip id (upper half of the device id register)
    pub id: u16,
    /// Marvell part number
    pub device: u16,
}

/// One entry per supported chip id
pub const CHIPS: &[ChipModel] = &[
    ChipModel {
        id: 0x04,
        device: 8385,
    },
    ChipModel {
        id: 0x0b,
        device: 8686,
    },
];

/// Names of the two firmware images for a chip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareNames {
    /// Helper (stage one) image
    pub helper: String,
    /// Main (stage two) image
    pub main: String,
}

impl ChipModel {
    /// Look up a chip id
    pub fn lookup(id: u16) -> Result<&'static ChipModel> {
        CHIPS.iter().find(|c| c.id == id).ok_or_else(|| {
            log::error!("unsupported chip id: 0x{:02x}", id);
            Error::UnsupportedChip(id)
        })
    }

    /// Firmware image names for this chip
    pub fn firmware_names(&self) -> FirmwareNames {
        FirmwareNames {
            helper: format!("{}{}_hlp.bin", FIRMWARE_FAMILY, self.device),
            main: format!("{}{}.bin", FIRMWARE_FAMILY, self.device),
        }
    }
}

/// Derive the firmware image names for a chip id
pub fn firmware_names(card_id: u16) -> Result<FirmwareNames> {
    ChipModel::lookup(card_id).map(ChipModel::firmware_names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_8385_names() {
        let names = firmware_names(0x04).unwrap();
        assert_eq!(names.helper, "libertas/gspi8385_hlp.bin");
        assert_eq!(names.main, "libertas/gspi8385.bin");
    }

    #[test]
    fn test_8686_names() {
        let names = firmware_names(0x0b).unwrap();
        assert_eq!(names.helper, "libertas/gspi8686_hlp.bin");
        assert_eq!(names.main, "libertas/gspi8686.bin");
    }

    #[test]
    fn test_unknown_id() {
        for id in [0x00, 0x05, 0x0c, 0xffff] {
            assert!(matches!(
                firmware_names(id),
                Err(Error::UnsupportedChip(x)) if x == id
            ));
        }
    }

    #[test]
    fn test_ids_unique() {
        for (i, a) in CHIPS.iter().enumerate() {
            assert!(CHIPS[i + 1..].iter().all(|b| b.id != a.id));
        }
    }
}
