//! Board manifest
//!
//! The built-in board table plus boards loaded at runtime from RON files.
//! A RON manifest is a list of board profiles:
//!
//! ```ron
//! [
//!     (
//!         id: "esp32-new-board",
//!         name: "ESP32 New Board",
//!         chip_family: "esp32",
//!         baud_rate: 921600,
//!         flash_mode: "dio",
//!         flash_freq: "40m",
//!         flash_size: "4MB",
//!         parts: [
//!             (label: "Bootloader", offset: 0x1000, url: "/firmware/esp32-new-board/bootloader.bin"),
//!             (label: "Firmware", offset: 0x10000, url: "/firmware/esp32-new-board/firmware.bin"),
//!         ],
//!     ),
//! ]
//! ```

use std::collections::HashSet;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};

mod types;

pub use types::*;

#[derive(Debug, Clone, Default)]
pub struct Manifest {
    boards: Vec<BoardProfile>,
}

impl Manifest {
    pub fn new(boards: Vec<BoardProfile>) -> Self {
        Self { boards }
    }

    /// The boards compiled into the tool.
    pub fn builtin() -> Self {
        Self::new(vec![BoardProfile {
            id: "vexaminer-v2".into(),
            name: "VexaMiner v2".into(),
            description: "Latest VexaMiner board with 2.8\" display".into(),
            chip_family: ChipFamily::Esp32,
            baud_rate: 460800,
            flash_mode: FlashMode::Dio,
            flash_freq: FlashFreq::F40m,
            flash_size: FlashSize::_4Mb,
            erase_all: false,
            parts: vec![
                FlashPart::new("Bootloader", 0x1000, "/firmware/vexaminer-v2/bootloader.bin"),
                FlashPart::new("Partition Table", 0x8000, "/firmware/vexaminer-v2/partitions.bin"),
                FlashPart::new("Boot App", 0xe000, "/firmware/vexaminer-v2/boot_app0.bin"),
                FlashPart::new("Firmware", 0x10000, "/firmware/vexaminer-v2/firmware.bin"),
            ],
        }])
    }

    pub fn from_ron_str(content: &str) -> Result<Self> {
        let boards: Vec<BoardProfile> = ron::from_str(content)?;
        let manifest = Self::new(boards);
        manifest.validate()?;
        Ok(manifest)
    }

    pub fn load_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest = Self::from_ron_str(&content)?;
        debug!("Loaded {} board(s) from {}", manifest.len(), path.display());
        Ok(manifest)
    }

    /// Adds the boards of `other`; a board whose id already exists replaces
    /// the existing entry in place.
    pub fn extend(&mut self, other: Manifest) {
        for board in other.boards {
            match self.boards.iter_mut().find(|b| b.id == board.id) {
                Some(existing) => *existing = board,
                None => self.boards.push(board),
            }
        }
    }

    pub fn lookup(&self, id: &str) -> Option<&BoardProfile> {
        self.boards.iter().find(|b| b.id == id)
    }

    /// Like [`Manifest::lookup`], but a missing board is a configuration error.
    pub fn require(&self, id: &str) -> Result<&BoardProfile> {
        self.lookup(id)
            .ok_or_else(|| Error::BoardNotFound(id.to_string()))
    }

    pub fn boards(&self) -> &[BoardProfile] {
        &self.boards
    }

    pub fn len(&self) -> usize {
        self.boards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boards.is_empty()
    }

    pub fn validate(&self) -> Result<()> {
        let mut ids = HashSet::new();
        for board in &self.boards {
            if !ids.insert(board.id.as_str()) {
                return Err(Error::Manifest(format!("duplicate board id '{}'", board.id)));
            }
            validate_board(board)?;
        }
        Ok(())
    }
}

fn validate_board(board: &BoardProfile) -> Result<()> {
    if board.id.is_empty() {
        return Err(Error::Manifest("board with empty id".into()));
    }
    if board.baud_rate == 0 {
        return Err(Error::Manifest(format!("{}: baud rate must be non-zero", board.id)));
    }
    if board.parts.is_empty() {
        return Err(Error::Manifest(format!("{}: no parts to flash", board.id)));
    }

    let mut offsets = HashSet::new();
    for part in &board.parts {
        if part.url.is_empty() {
            return Err(Error::Manifest(format!("{}: {} has no url", board.id, part.label)));
        }
        if !offsets.insert(part.offset) {
            return Err(Error::Manifest(format!(
                "{}: offset {:#x} used more than once",
                board.id, part.offset
            )));
        }
    }
    Ok(())
}
