use log::{info, warn};

use crate::download::{validate_payload, PartSource};
use crate::error::{Error, Result};
use crate::loader::{ConnectOptions, FlashImage, Loader, LoaderEvent, WriteOptions};
use crate::manifest::BoardProfile;
use crate::serial::Transport;

mod config;
mod progress;
mod types;

pub use config::*;
pub use progress::{overall_percentage, ProgressTracker, WRITE_BASE, WRITE_CEILING};
pub use types::*;

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━";

/// Runs one flash attempt of a board: connect, download, write, reset.
pub struct Flasher<'b, L, S> {
    board: &'b BoardProfile,
    config: FlasherConfig,
    loader: L,
    source: S,
    session: FlashSession,
}

impl<'b, L: Loader, S: PartSource> Flasher<'b, L, S> {
    pub fn new(board: &'b BoardProfile, config: FlasherConfig, loader: L, source: S) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            board,
            config,
            loader,
            source,
            session: FlashSession::new(),
        })
    }

    /// Uses a session created by the caller instead of a fresh one.
    pub fn with_session(mut self, session: FlashSession) -> Self {
        self.session = session;
        self
    }

    /// Handle for cancelling this attempt from elsewhere.
    pub fn session(&self) -> FlashSession {
        self.session.clone()
    }

    pub fn into_parts(self) -> (L, S) {
        (self.loader, self.source)
    }

    /// Runs the whole pipeline. Any failure is reported once as an `error`
    /// record and returned; the transport is disconnected in every case.
    pub async fn run(&mut self, transport: &mut Transport, events: &mut FlashEvents<'_>) -> Result<()> {
        let mut tracker = ProgressTracker::new(self.board.parts.len());

        let result = self.pipeline(transport, &mut tracker, events).await;
        if let Err(e) = &result {
            let message = e.to_string();
            warn!("Flashing {} failed: {}", self.board.id, message);
            events.log(&format!("ERROR: {}", message));
            events.progress(tracker.error(message));
        }

        transport.disconnect().await;
        result
    }

    async fn pipeline(
        &mut self,
        transport: &mut Transport,
        tracker: &mut ProgressTracker,
        events: &mut FlashEvents<'_>,
    ) -> Result<()> {
        info!("Flashing {} on {}", self.board.name, transport.port_name());

        self.connect(transport, tracker, events).await?;
        self.check_cancelled()?;

        let images = self.download(tracker, events).await?;
        check_layout(&images)?;

        self.write(transport, &images, tracker, events).await?;
        self.check_cancelled()?;

        self.finish(transport, tracker, events).await;
        Ok(())
    }

    fn check_cancelled(&self) -> Result<()> {
        if self.session.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    async fn connect(
        &mut self,
        transport: &mut Transport,
        tracker: &mut ProgressTracker,
        events: &mut FlashEvents<'_>,
    ) -> Result<()> {
        events.progress(tracker.stage(FlashStage::Connecting, 0));
        events.log("Connecting to device...");

        let options = ConnectOptions {
            rom_baud: self.config.rom_baud,
            baud: self.board.baud_rate,
            connect_timeout: self.config.connect_timeout,
        };
        let chip = self
            .loader
            .connect(transport, &options, &mut |event| forward_log(events, event))
            .await?;

        events.log(&format!("Chip detected: {}", chip.name));
        if let Some(mac) = &chip.mac {
            events.log(&format!("MAC: {}", mac));
        }

        match chip.family {
            Some(family) if family != self.board.chip_family && self.config.check_chip => {
                return Err(Error::ChipMismatch {
                    expected: self.board.chip_family,
                    detected: chip.name,
                });
            }
            None => warn!("Unrecognised chip '{}', skipping family check", chip.name),
            _ => {}
        }

        events.progress(tracker.stage(FlashStage::Connected, 5));
        Ok(())
    }

    async fn download(
        &mut self,
        tracker: &mut ProgressTracker,
        events: &mut FlashEvents<'_>,
    ) -> Result<Vec<FlashImage>> {
        events.progress(tracker.stage(FlashStage::Preparing, 10));
        events.log(&format!(
            "Downloading {} firmware file(s)...",
            self.board.parts.len()
        ));

        let mut images = Vec::with_capacity(self.board.parts.len());
        for part in &self.board.parts {
            events.log(&format!("  Downloading: {} from {}", part.label, part.url));

            let failed = |reason| Error::Download {
                label: part.label.clone(),
                url: part.url.clone(),
                reason,
            };
            let data = self.source.fetch(&part.url).await.map_err(failed)?;
            validate_payload(&data, self.config.min_part_size, part.crc32).map_err(failed)?;

            events.log(&format!(
                "  ✓ {}: {} bytes downloaded (crc32 {:#010x})",
                part.label,
                data.len(),
                crc32fast::hash(&data)
            ));
            images.push(FlashImage {
                label: part.label.clone(),
                offset: part.offset,
                data,
            });

            self.check_cancelled()?;
        }

        let total: usize = images.iter().map(|i| i.data.len()).sum();
        events.log(&format!(
            "✓ All {} firmware files downloaded successfully",
            images.len()
        ));
        events.log(&format!("Total size: {} bytes", total));
        Ok(images)
    }

    async fn write(
        &mut self,
        transport: &mut Transport,
        images: &[FlashImage],
        tracker: &mut ProgressTracker,
        events: &mut FlashEvents<'_>,
    ) -> Result<()> {
        events.progress(tracker.stage(FlashStage::Flashing, WRITE_BASE as u8));
        events.log("Writing firmware to flash...");

        let options = WriteOptions {
            chip: self.board.chip_family,
            flash_mode: self.board.flash_mode,
            flash_freq: self.board.flash_freq,
            flash_size: self.board.flash_size,
            erase_all: self.board.erase_all,
            compress: self.config.compress,
        };

        self.loader
            .write_parts(transport, images, &options, &mut |event| match event {
                LoaderEvent::Log(line) => events.log(&line),
                LoaderEvent::Erasing => {
                    events.progress(tracker.write_stage(FlashStage::Erasing, None))
                }
                LoaderEvent::Progress {
                    part,
                    written,
                    total,
                } => events.progress(tracker.part(part, written, total)),
                LoaderEvent::Verified { part } => {
                    events.progress(tracker.write_stage(FlashStage::Verifying, Some(part)))
                }
            })
            .await
    }

    async fn finish(
        &mut self,
        transport: &mut Transport,
        tracker: &mut ProgressTracker,
        events: &mut FlashEvents<'_>,
    ) {
        events.log("Flash complete! Resetting device...");

        match self.loader.reset_and_finish(transport).await {
            Ok(()) => events.log("Device reset successfully."),
            Err(e) => {
                info!("Auto-reset failed: {}", e);
                events.log("Note: Auto-reset not available.");
            }
        }

        events.progress(tracker.done());
        events.log("✓ Firmware installed successfully!");
        events.log("");
        events.log(RULE);
        events.log("  NEXT STEP: Press the RESET button on your board");
        events.log("  (or unplug and replug USB) to start the new firmware.");
        events.log(RULE);
    }
}

fn forward_log(events: &mut FlashEvents<'_>, event: LoaderEvent) {
    if let LoaderEvent::Log(line) = event {
        events.log(&line);
    }
}

/// Rejects images whose byte ranges overlap once their real sizes are known.
fn check_layout(images: &[FlashImage]) -> Result<()> {
    let mut sorted: Vec<&FlashImage> = images.iter().collect();
    sorted.sort_by_key(|image| image.offset);

    for pair in sorted.windows(2) {
        if pair[0].end() > pair[1].offset as u64 {
            return Err(Error::Overlap {
                first: format!("{} ({:#x}..{:#x})", pair[0].label, pair[0].offset, pair[0].end()),
                second: format!("{} ({:#x})", pair[1].label, pair[1].offset),
            });
        }
    }
    Ok(())
}
