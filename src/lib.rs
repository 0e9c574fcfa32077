//! ESP32 Board Flashing Library
//!
//! Flashes pre-built firmware images onto ESP32-family boards over a serial
//! port. Each board is described by a profile in the [`Manifest`]: chip
//! family, baud rate, flash geometry and the binary parts with their
//! offsets. A flash attempt downloads every part, hands them to a
//! [`Loader`] in one write, resets the chip and releases the port.
//!
//! # Features
//! - Built-in board table, extendable from RON files
//! - Serial port picking with USB VID/PID filters
//! - Firmware parts over HTTP or from a local directory
//! - Normalized progress records and log lines for a front-end
//! - Best-effort cancellation between stages
//!
//! The ROM bootloader protocol itself is left to the loader;
//! [`EsptoolLoader`] delegates it to Espressif's `esptool`.
//!
//! # Examples
//!
//! ```no_run
//! use espboard_flash::{
//!     EsptoolLoader, FlashEvents, FlasherConfig, HttpSource, Manifest, Transport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> espboard_flash::Result<()> {
//!     let manifest = Manifest::builtin();
//!     let board = manifest.require("vexaminer-v2")?;
//!
//!     let mut transport = Transport::from_name("/dev/ttyUSB0");
//!     let source = HttpSource::with_base("http://localhost:5173/")?;
//!     let mut events = FlashEvents::new(
//!         |line| println!("{line}"),
//!         |progress| eprintln!("{} {}%", progress.stage, progress.percentage),
//!     );
//!
//!     espboard_flash::flash_board(
//!         &mut transport,
//!         board,
//!         FlasherConfig::new(),
//!         EsptoolLoader::new(),
//!         source,
//!         &mut events,
//!     )
//!     .await
//! }
//! ```

mod download;
mod error;
mod flasher;
mod loader;
mod manifest;
mod serial;

pub use download::{validate_payload, AnySource, DirSource, HttpSource, PartSource};
pub use error::{DownloadFailure, Error, Result};
pub use flasher::{
    overall_percentage, FlashEvents, FlashProgress, FlashSession, FlashStage, Flasher,
    FlasherConfig, ProgressTracker, WRITE_CEILING,
};
pub use loader::{
    ChipInfo, ConnectOptions, EsptoolLoader, FlashImage, Loader, LoaderEvent, WriteOptions,
};
pub use manifest::{
    BoardProfile, ChipFamily, FlashFreq, FlashMode, FlashPart, FlashSize, Manifest,
};
pub use serial::{describe_port, filter_ports, request_port, PortFilter, PortPicker, Transport};

/// Flashes `board` through `transport` in one call.
pub async fn flash_board<L, S>(
    transport: &mut Transport,
    board: &BoardProfile,
    config: FlasherConfig,
    loader: L,
    source: S,
    events: &mut FlashEvents<'_>,
) -> Result<()>
where
    L: Loader,
    S: PartSource,
{
    let mut flasher = Flasher::new(board, config, loader, source)?;
    flasher.run(transport, events).await
}

/// Creates a transport for a port picked from the available ones.
///
/// Returns `Ok(None)` when the picker is cancelled.
pub fn select_transport(
    filters: &[PortFilter],
    picker: &mut dyn PortPicker,
) -> Result<Option<Transport>> {
    Ok(request_port(filters, picker)?.map(Transport::new))
}
