use std::time::Duration;

use crate::error::{Error, Result};

/// Tunables of the flash pipeline that are not part of a board profile.
#[derive(Debug, Clone)]
pub struct FlasherConfig {
    /// Baud rate the ROM bootloader listens on after reset.
    pub rom_baud: u32,
    /// Payloads below this size are rejected as likely error pages.
    pub min_part_size: usize,
    /// Let the loader compress data on the wire.
    pub compress: bool,
    /// Fail when the detected chip does not belong to the board's family.
    pub check_chip: bool,
    pub connect_timeout: Duration,
}

impl Default for FlasherConfig {
    fn default() -> Self {
        Self {
            rom_baud: 115200,
            min_part_size: 100,
            compress: true,
            check_chip: true,
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl FlasherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rom_baud(mut self, baud: u32) -> Self {
        self.rom_baud = baud;
        self
    }

    pub fn with_min_part_size(mut self, size: usize) -> Self {
        self.min_part_size = size;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn no_compress(mut self) -> Self {
        self.compress = false;
        self
    }

    pub fn skip_chip_check(mut self) -> Self {
        self.check_chip = false;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.rom_baud == 0 {
            return Err(Error::Configuration("ROM baud rate must be non-zero".into()));
        }

        if self.min_part_size == 0 {
            return Err(Error::Configuration(
                "minimum part size must be at least one byte".into(),
            ));
        }

        if self.connect_timeout.is_zero() {
            return Err(Error::Configuration("connect timeout must be non-zero".into()));
        }

        Ok(())
    }
}
