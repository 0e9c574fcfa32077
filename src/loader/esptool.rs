use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use log::{debug, info};
use tokio::process::Command;
use tokio::time::{sleep, timeout};
use tokio_serial::SerialPort;
use tokio_stream::StreamExt;
use tokio_util::codec::FramedRead;

use super::codec::{EsptoolLine, LineCodec};
use super::{image_at, ChipInfo, ConnectOptions, FlashImage, Loader, LoaderEvent, WriteOptions};
use crate::error::{Error, Result};
use crate::serial::Transport;

/// How long EN is held low for a hard reset.
const RESET_PULSE: Duration = Duration::from_millis(100);

/// [`Loader`] that runs Espressif's `esptool` for the ROM protocol.
///
/// `esptool` opens the serial port itself, so the transport is released
/// before every invocation. Only the final reset drives the port directly.
pub struct EsptoolLoader {
    program: PathBuf,
    rom_baud: u32,
    baud: u32,
}

impl Default for EsptoolLoader {
    fn default() -> Self {
        Self {
            program: PathBuf::from("esptool"),
            rom_baud: 115200,
            baud: 115200,
        }
    }
}

impl EsptoolLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn base_args(&self, transport: &Transport) -> Vec<String> {
        vec![
            "--port".into(),
            transport.port_name().into(),
            "--baud".into(),
            self.baud.to_string(),
            "--before".into(),
            "default_reset".into(),
            "--after".into(),
            "no_reset".into(),
        ]
    }

    /// Runs esptool, forwarding its output as log events plus whatever
    /// `translate` derives from each parsed line.
    async fn run(
        &self,
        args: &[String],
        fail: fn(String) -> Error,
        on_event: &mut dyn FnMut(LoaderEvent),
        mut translate: impl FnMut(&EsptoolLine) -> Option<LoaderEvent>,
    ) -> Result<()> {
        debug!("{} {}", self.program.display(), args.join(" "));

        let mut command = Command::new(&self.program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // Keep the terminal's SIGINT away from esptool so a Ctrl-C never
        // cuts a write short; the session flag handles cancellation.
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .map_err(|e| fail(format!("cannot start {}: {}", self.program.display(), e)))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| fail("esptool stdout unavailable".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| fail("esptool stderr unavailable".into()))?;

        let stderr_task = tokio::spawn(async move {
            let mut lines = FramedRead::new(stderr, LineCodec::new());
            let mut collected = Vec::new();
            while let Some(Ok(line)) = lines.next().await {
                collected.push(line);
            }
            collected
        });

        let mut fatal = None;
        let mut lines = FramedRead::new(stdout, LineCodec::new());
        while let Some(line) = lines.next().await {
            let line = line?;
            let parsed = EsptoolLine::parse(&line);
            match &parsed {
                // Progress redraws would flood the log.
                EsptoolLine::Writing { .. } => {}
                EsptoolLine::Fatal(message) => fatal = Some(message.clone()),
                _ => on_event(LoaderEvent::Log(line)),
            }
            if let Some(event) = translate(&parsed) {
                on_event(event);
            }
        }

        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_default();
        if status.success() {
            return Ok(());
        }

        let message = fatal
            .or_else(|| {
                stderr_lines.iter().find_map(|line| match EsptoolLine::parse(line) {
                    EsptoolLine::Fatal(message) => Some(message),
                    _ => None,
                })
            })
            .or_else(|| stderr_lines.last().cloned())
            .unwrap_or_else(|| format!("esptool exited with {}", status));
        Err(fail(message))
    }
}

impl Loader for EsptoolLoader {
    async fn connect(
        &mut self,
        transport: &mut Transport,
        options: &ConnectOptions,
        on_event: &mut dyn FnMut(LoaderEvent),
    ) -> Result<ChipInfo> {
        self.rom_baud = options.rom_baud;
        self.baud = options.baud;
        transport.disconnect().await;

        let mut args = self.base_args(transport);
        args.push("chip_id".into());

        let mut chip = None;
        let mut mac = None;
        let probe = self.run(&args, Error::Connection, on_event, |line| {
            match line {
                EsptoolLine::Chip(name) => chip = Some(name.clone()),
                EsptoolLine::Mac(address) => mac = Some(address.clone()),
                _ => {}
            }
            None
        });

        match timeout(options.connect_timeout, probe).await {
            Ok(result) => result?,
            Err(_) => return Err(Error::Timeout(options.connect_timeout.as_secs())),
        }

        let name = chip.ok_or_else(|| Error::Connection("esptool did not report a chip".into()))?;
        let mut info = ChipInfo::from_name(name);
        info.mac = mac;
        Ok(info)
    }

    async fn write_parts(
        &mut self,
        transport: &mut Transport,
        images: &[FlashImage],
        options: &WriteOptions,
        on_event: &mut dyn FnMut(LoaderEvent),
    ) -> Result<()> {
        if images.is_empty() {
            return Ok(());
        }
        transport.disconnect().await;

        let workdir = tempfile::tempdir()?;
        let mut args = vec!["--chip".to_string(), options.chip.esptool_name().into()];
        args.extend(self.base_args(transport));
        args.push("write_flash".into());
        if options.erase_all {
            args.push("--erase-all".into());
        }
        args.extend([
            "--flash_mode".to_string(),
            options.flash_mode.to_string(),
            "--flash_freq".to_string(),
            options.flash_freq.to_string(),
            "--flash_size".to_string(),
            options.flash_size.to_string(),
        ]);
        args.push(if options.compress { "--compress" } else { "--no-compress" }.into());

        for (index, image) in images.iter().enumerate() {
            let path = workdir.path().join(format!("part{}.bin", index));
            tokio::fs::write(&path, &image.data).await?;
            args.push(format!("{:#x}", image.offset));
            args.push(path.to_string_lossy().into_owned());
        }

        let mut current = 0usize;
        self.run(&args, Error::Write, on_event, |line| match line {
            EsptoolLine::Erasing => Some(LoaderEvent::Erasing),
            EsptoolLine::Writing { address, percent } => {
                current = image_at(images, *address).unwrap_or(current);
                let total = images[current].data.len() as u64;
                let written = ((total as f64 * percent / 100.0).round() as u64).min(total);
                Some(LoaderEvent::Progress {
                    part: current,
                    written,
                    total,
                })
            }
            EsptoolLine::Wrote { address, .. } => {
                current = image_at(images, *address).unwrap_or(current);
                let total = images[current].data.len() as u64;
                Some(LoaderEvent::Progress {
                    part: current,
                    written: total,
                    total,
                })
            }
            EsptoolLine::HashVerified => Some(LoaderEvent::Verified { part: current }),
            _ => None,
        })
        .await
    }

    async fn reset_and_finish(&mut self, transport: &mut Transport) -> Result<()> {
        let stream = transport.open(self.rom_baud)?;
        stream.write_data_terminal_ready(false)?;
        stream.write_request_to_send(true)?;
        sleep(RESET_PULSE).await;
        stream.write_request_to_send(false)?;
        info!("Hard reset via RTS on {}", transport.port_name());
        Ok(())
    }
}
