//! Seam to the flashing protocol engine.
//!
//! Chip detection, stub upload and the flash-write framing are not done by
//! this crate. A [`Loader`] drives whatever implements them; [`EsptoolLoader`]
//! delegates to Espressif's `esptool`.

use std::time::Duration;

use bytes::Bytes;

use crate::error::Result;
use crate::manifest::{ChipFamily, FlashFreq, FlashMode, FlashSize};
use crate::serial::Transport;

mod codec;
mod esptool;

pub use esptool::EsptoolLoader;

/// Chip reported by the loader after the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChipInfo {
    /// Description as reported, e.g. `ESP32-D0WD-V3 (revision v3.1)`.
    pub name: String,
    pub family: Option<ChipFamily>,
    pub mac: Option<String>,
}

impl ChipInfo {
    pub fn from_name(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            family: ChipFamily::from_chip_name(&name),
            name,
            mac: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Baud rate of the ROM bootloader.
    pub rom_baud: u32,
    /// Baud rate to switch to for flashing.
    pub baud: u32,
    /// Upper bound for the whole handshake.
    pub connect_timeout: Duration,
}

/// One binary, ready to write.
#[derive(Debug, Clone)]
pub struct FlashImage {
    pub label: String,
    pub offset: u32,
    pub data: Bytes,
}

impl FlashImage {
    pub fn end(&self) -> u64 {
        self.offset as u64 + self.data.len() as u64
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub chip: ChipFamily,
    pub flash_mode: FlashMode,
    pub flash_freq: FlashFreq,
    pub flash_size: FlashSize,
    pub erase_all: bool,
    pub compress: bool,
}

/// Reported by a loader while it works.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderEvent {
    /// Free-text output of the loader.
    Log(String),
    /// Full chip erase started.
    Erasing,
    /// `written` of `total` bytes of image `part` are on the chip.
    Progress { part: usize, written: u64, total: u64 },
    /// Image `part` has been read back and matches.
    Verified { part: usize },
}

/// The operations the flash pipeline needs from a protocol engine.
pub trait Loader {
    /// Performs the bootloader handshake and identifies the chip.
    async fn connect(
        &mut self,
        transport: &mut Transport,
        options: &ConnectOptions,
        on_event: &mut dyn FnMut(LoaderEvent),
    ) -> Result<ChipInfo>;

    /// Writes all images in one go. Runs to completion once started.
    async fn write_parts(
        &mut self,
        transport: &mut Transport,
        images: &[FlashImage],
        options: &WriteOptions,
        on_event: &mut dyn FnMut(LoaderEvent),
    ) -> Result<()>;

    /// Resets the chip into the freshly written firmware.
    async fn reset_and_finish(&mut self, transport: &mut Transport) -> Result<()>;
}

/// Index of the image that contains `address`, if any.
pub fn image_at(images: &[FlashImage], address: u32) -> Option<usize> {
    images
        .iter()
        .enumerate()
        .filter(|(_, image)| image.offset <= address)
        .max_by_key(|(_, image)| image.offset)
        .filter(|(_, image)| (address as u64) < image.end().max(image.offset as u64 + 1))
        .map(|(index, _)| index)
}
