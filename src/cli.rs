//! CLI argument parsing

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use espboard_flash::PortFilter;

/// Parse a string as a hex u16, with or without `0x`
fn parse_hex_u16(s: &str) -> Result<u16, String> {
    let digits = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u16::from_str_radix(digits, 16).map_err(|e| format!("Invalid hex value '{}': {}", s, e))
}

/// Parse a USB filter given as `VID` or `VID:PID`
pub fn parse_usb_filter(s: &str) -> Result<PortFilter, String> {
    match s.split_once(':') {
        Some((vid, pid)) => Ok(PortFilter::device(parse_hex_u16(vid)?, parse_hex_u16(pid)?)),
        None => Ok(PortFilter::vendor(parse_hex_u16(s)?)),
    }
}

#[derive(Parser)]
#[command(name = "espboard-flash")]
#[command(author, version, about = "Flash pre-built firmware onto ESP32 boards", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Additional board manifest (RON format), merged over the built-in boards
    #[arg(long, global = true)]
    pub manifest: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level selected by the `-v` count.
    pub fn log_level(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    }
}

/// Which serial ports to offer
#[derive(clap::Args, Debug, Clone, Default)]
pub struct PortArgs {
    /// Only offer known ESP32 USB-serial bridges (CH340, CP2102, Espressif USB)
    #[arg(long)]
    pub known_bridges: bool,

    /// Only offer USB devices matching VID or VID:PID (hex, repeatable)
    #[arg(long = "usb", value_parser = parse_usb_filter)]
    pub usb: Vec<PortFilter>,
}

impl PortArgs {
    pub fn filters(&self) -> Vec<PortFilter> {
        let mut filters = self.usb.clone();
        if self.known_bridges {
            filters.extend(PortFilter::known_bridges());
        }
        filters
    }
}

/// Where firmware parts are fetched from
#[derive(clap::Args, Debug, Clone)]
#[group(required = true, multiple = false)]
pub struct SourceArgs {
    /// Base URL that site-relative part URLs resolve against
    #[arg(long)]
    pub base_url: Option<String>,

    /// Local directory laid out like the web root (e.g. ./public)
    #[arg(long)]
    pub firmware_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// List the boards that can be flashed
    Boards,

    /// List serial ports
    Ports {
        #[command(flatten)]
        ports: PortArgs,
    },

    /// Flash firmware onto a board
    Flash {
        /// Board id from the manifest
        #[arg(short, long)]
        board: String,

        /// Serial port (prompted for if omitted)
        #[arg(short, long)]
        port: Option<String>,

        #[command(flatten)]
        ports: PortArgs,

        #[command(flatten)]
        source: SourceArgs,

        /// esptool executable
        #[arg(long, default_value = "esptool")]
        esptool: PathBuf,

        /// Reject downloaded parts smaller than this many bytes
        #[arg(long, default_value_t = 100)]
        min_part_size: usize,

        /// Seconds to wait for the bootloader handshake
        #[arg(long, default_value_t = 30)]
        connect_timeout: u64,

        /// Send uncompressed data
        #[arg(long)]
        no_compress: bool,

        /// Flash even if the detected chip does not match the board
        #[arg(long)]
        skip_chip_check: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn verbose_count_selects_log_level() {
        let level = |args: &[&str]| Cli::try_parse_from(args).unwrap().log_level();
        assert_eq!(level(&["espboard-flash", "boards"]), log::LevelFilter::Info);
        assert_eq!(level(&["espboard-flash", "-v", "boards"]), log::LevelFilter::Debug);
        assert_eq!(level(&["espboard-flash", "boards", "-vv"]), log::LevelFilter::Trace);
        assert_eq!(level(&["espboard-flash", "-vvv", "boards"]), log::LevelFilter::Trace);
    }

    #[test]
    fn parses_usb_filters() {
        assert_eq!(parse_usb_filter("303a"), Ok(PortFilter::vendor(0x303a)));
        assert_eq!(
            parse_usb_filter("0x1a86:0x7523"),
            Ok(PortFilter::device(0x1a86, 0x7523))
        );
        assert!(parse_usb_filter("xyz").is_err());
    }

    #[test]
    fn flash_requires_a_source() {
        assert!(Cli::try_parse_from(["espboard-flash", "flash", "-b", "vexaminer-v2"]).is_err());
        assert!(Cli::try_parse_from([
            "espboard-flash",
            "flash",
            "-b",
            "vexaminer-v2",
            "--base-url",
            "http://localhost:5173/",
            "--firmware-dir",
            "public",
        ])
        .is_err());

        let cli = Cli::try_parse_from([
            "espboard-flash",
            "flash",
            "-b",
            "vexaminer-v2",
            "--firmware-dir",
            "public",
            "--known-bridges",
        ])
        .unwrap();
        let Commands::Flash { ports, source, .. } = cli.command else {
            panic!("expected flash command");
        };
        assert_eq!(ports.filters().len(), 3);
        assert_eq!(source.firmware_dir, Some(PathBuf::from("public")));
    }
}
