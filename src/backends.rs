//! Backend registration and dispatch
//!
//! A backend string names the board type and its options, e.g. `dummy` or
//! `linux_spi:dev=/dev/spidev0.0,cs=8,irq=25`. Options from a board file are
//! applied first so that the command line can override them.

use crate::config::BoardFile;
#[cfg(feature = "dummy")]
use crate::config::parse_number;

/// Information about a backend
pub struct BackendInfo {
    /// Primary name (used for matching)
    pub name: &'static str,
    /// Alternative names
    pub aliases: &'static [&'static str],
    /// Short description
    pub description: &'static str,
}

/// Get information about all backends enabled at compile time
#[allow(unused_mut, clippy::vec_init_then_push)]
pub fn available_backends() -> Vec<BackendInfo> {
    let mut backends = Vec::new();

    #[cfg(feature = "dummy")]
    backends.push(BackendInfo {
        name: "dummy",
        aliases: &[],
        description: "In-memory card emulator (chip=<id>,rev=<n>,resident=<yes|no>,main_len=<n>,echo=<yes|no>)",
    });

    #[cfg(feature = "linux-spi")]
    backends.push(BackendInfo {
        name: "linux_spi",
        aliases: &["linux-spi", "spidev"],
        description: "Linux spidev + GPIO (dev=/dev/spidevX.Y,cs=<line>,irq=<line>[,reset=<line>,gpiochip=<path>,spispeed=<kHz>])",
    });

    backends
}

/// Help text listing all available backends
pub fn backend_help() -> String {
    let backends = available_backends();

    if backends.is_empty() {
        return "No backends available (recompile with backend features enabled)".to_string();
    }

    let mut help = String::from("Available backends:\n");
    for b in &backends {
        help.push_str(&format!("  {:10} - {}\n", b.name, b.description));
        if !b.aliases.is_empty() {
            help.push_str(&format!("  {:10}   aliases: {}\n", "", b.aliases.join(", ")));
        }
    }
    help
}

/// Short list of backend names for CLI help
pub fn backend_names_short() -> String {
    let backends = available_backends();
    let names: Vec<&str> = backends.iter().map(|b| b.name).collect();
    names.join(", ")
}

/// Resolve a name or alias to the primary backend name
pub fn find_backend(name: &str) -> Option<&'static str> {
    available_backends()
        .into_iter()
        .find(|b| b.name == name || b.aliases.contains(&name))
        .map(|b| b.name)
}

/// Parsed backend string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendParams {
    /// Backend name as given
    pub name: String,
    /// Options, in the order given
    pub params: Vec<(String, String)>,
}

/// Parse a backend string of the form `name[:key=value,...]`
pub fn parse_backend_params(s: &str) -> Result<BackendParams, Box<dyn std::error::Error>> {
    let (name, opts_str) = s.split_once(':').unwrap_or((s, ""));

    let mut params = Vec::new();
    if !opts_str.is_empty() {
        for opt in opts_str.split(',') {
            if let Some((key, value)) = opt.split_once('=') {
                params.push((key.to_string(), value.to_string()));
            } else {
                return Err(
                    format!("Invalid parameter format: '{}' (expected key=value)", opt).into(),
                );
            }
        }
    }

    Ok(BackendParams {
        name: name.to_string(),
        params,
    })
}

/// An opened board, one variant per compiled-in backend
pub enum Board {
    /// Emulated card
    #[cfg(feature = "dummy")]
    Dummy(libertas_spi_dummy::DummyDevice),
    /// spidev + GPIO board
    #[cfg(feature = "linux-spi")]
    Linux(libertas_spi_linux::LinuxBoard),
}

/// Run `$body` with `$dev` bound to the concrete board
macro_rules! with_board {
    ($board:expr, $dev:ident => $body:expr) => {
        match $board {
            #[cfg(feature = "dummy")]
            $crate::backends::Board::Dummy($dev) => $body,
            #[cfg(feature = "linux-spi")]
            $crate::backends::Board::Linux($dev) => $body,
        }
    };
}
pub(crate) use with_board;

/// Open the board named by `spec`, with defaults from an optional board file
pub fn open_board(
    spec: &str,
    board_file: Option<&BoardFile>,
) -> Result<Board, Box<dyn std::error::Error>> {
    let parsed = parse_backend_params(spec)?;
    let mut options = board_file.map(BoardFile::backend_options).unwrap_or_default();
    options.extend(parsed.params);
    let options: Vec<(&str, &str)> = options
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();

    let Some(name) = find_backend(&parsed.name) else {
        return Err(format!(
            "Unknown backend: {} (available: {})",
            parsed.name,
            backend_names_short()
        )
        .into());
    };
    log::debug!("Opening backend {}", name);

    match name {
        #[cfg(feature = "dummy")]
        "dummy" => {
            let config = parse_dummy_options(&options)?;
            Ok(Board::Dummy(
                libertas_spi_dummy::DummyCard::new(config).device(),
            ))
        }
        #[cfg(feature = "linux-spi")]
        "linux_spi" => {
            let config = libertas_spi_linux::parse_options(&options)?;
            Ok(Board::Linux(libertas_spi_linux::LinuxBoard::new(config)))
        }
        _ => Err(format!("Backend {} is not available in this build", name).into()),
    }
}

#[cfg(feature = "dummy")]
fn parse_yes_no(key: &str, value: &str) -> Result<bool, String> {
    match value {
        "1" | "yes" | "on" | "true" => Ok(true),
        "0" | "no" | "off" | "false" => Ok(false),
        _ => Err(format!("Invalid {} value: {}", key, value)),
    }
}

#[cfg(feature = "dummy")]
fn parse_bounded<T: TryFrom<u64>>(key: &str, value: &str) -> Result<T, String> {
    let n = parse_number(value).map_err(|e| format!("Invalid {} value: {}", key, e))?;
    T::try_from(n).map_err(|_| format!("Value out of range for {}: {}", key, value))
}

/// Parse options of the emulated card
#[cfg(feature = "dummy")]
pub fn parse_dummy_options(
    options: &[(&str, &str)],
) -> Result<libertas_spi_dummy::DummyConfig, String> {
    let mut config = libertas_spi_dummy::DummyConfig::default();
    let mut platform = config.platform.unwrap_or(libertas_spi_core::PlatformData {
        gpio_cs: 0,
        use_dummy_writes: false,
    });

    for (key, value) in options {
        match *key {
            "chip" => config.chip_id = parse_bounded(key, value)?,
            "rev" => config.chip_rev = parse_bounded(key, value)?,
            "resident" => config.firmware_resident = parse_yes_no(key, value)?,
            "main_len" => config.main_image_len = parse_bounded(key, value)?,
            "chunk" => {
                let chunk: u16 = parse_bounded(key, value)?;
                if chunk == 0 {
                    return Err("Invalid chunk value: 0 (must be at least 1)".to_string());
                }
                config.main_chunk_len = chunk;
            }
            "echo" => config.echo_commands = parse_yes_no(key, value)?,
            "cs" => platform.gpio_cs = parse_bounded(key, value)?,
            "dummy_writes" => platform.use_dummy_writes = parse_yes_no(key, value)?,
            _ => {
                log::warn!("dummy: Unknown option: {}={}", key, value);
            }
        }
    }
    config.platform = Some(platform);

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backend_params() {
        let p = parse_backend_params("linux_spi:dev=/dev/spidev0.0,cs=8").unwrap();
        assert_eq!(p.name, "linux_spi");
        assert_eq!(
            p.params,
            vec![
                ("dev".to_string(), "/dev/spidev0.0".to_string()),
                ("cs".to_string(), "8".to_string())
            ]
        );

        let p = parse_backend_params("dummy").unwrap();
        assert_eq!(p.name, "dummy");
        assert!(p.params.is_empty());

        assert!(parse_backend_params("dummy:chip").is_err());
    }

    #[test]
    fn test_unknown_backend() {
        assert!(open_board("nonsense", None).is_err());
        assert_eq!(find_backend("nonsense"), None);
    }

    #[cfg(feature = "linux-spi")]
    #[test]
    fn test_aliases() {
        assert_eq!(find_backend("spidev"), Some("linux_spi"));
        assert_eq!(find_backend("linux-spi"), Some("linux_spi"));
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_options() {
        let config = parse_dummy_options(&[
            ("chip", "0x04"),
            ("resident", "no"),
            ("main_len", "4096"),
            ("cs", "3"),
        ])
        .unwrap();
        assert_eq!(config.chip_id, 0x04);
        assert!(!config.firmware_resident);
        assert_eq!(config.main_image_len, 4096);
        assert_eq!(config.platform.map(|p| p.gpio_cs), Some(3));

        assert!(parse_dummy_options(&[("rev", "0x100")]).is_err());
        assert!(parse_dummy_options(&[("echo", "perhaps")]).is_err());
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_dummy_chunk_must_be_nonzero() {
        assert!(parse_dummy_options(&[("chunk", "0")]).is_err());
        assert!(parse_dummy_options(&[("chunk", "0x0")]).is_err());
        let config = parse_dummy_options(&[("chunk", "1")]).unwrap();
        assert_eq!(config.main_chunk_len, 1);
    }

    #[cfg(feature = "dummy")]
    #[test]
    fn test_board_file_options_are_overridden() {
        let board = BoardFile::from_toml_str("[gpio]\ncs = 5\n").unwrap();
        let Board::Dummy(device) = open_board("dummy:cs=6", Some(&board)).unwrap() else {
            panic!("expected the dummy board");
        };
        use libertas_spi_core::SpiDevice;
        assert_eq!(device.platform_data().map(|p| p.gpio_cs), Some(6));
    }
}
