//! espboard-flash - flash pre-built firmware onto ESP32 boards
//!
//! Command-line front-end for the library: lists the known boards and
//! serial ports, and runs a flash attempt with a progress bar and a log
//! console. Ctrl-C cancels the attempt after the current stage.

mod cli;

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::time::Duration;

use clap::Parser;
use cli::{Cli, Commands, PortArgs, SourceArgs};
use espboard_flash::{
    describe_port, filter_ports, select_transport, AnySource, DirSource, EsptoolLoader,
    FlashEvents, FlashStage, Flasher, FlasherConfig, HttpSource, Manifest, PortFilter, Transport,
};
use indicatif::{ProgressBar, ProgressStyle};
use serialport::SerialPortInfo;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG, when set, overrides the -v level.
    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    let manifest = load_manifest(cli.manifest.as_deref())?;
    log::debug!("{} board(s) available", manifest.len());

    match cli.command {
        Commands::Boards => {
            list_boards(&manifest);
            Ok(())
        }
        Commands::Ports { ports } => list_ports(&ports.filters()),
        Commands::Flash {
            board,
            port,
            ports,
            source,
            esptool,
            min_part_size,
            connect_timeout,
            no_compress,
            skip_chip_check,
        } => {
            let mut config = FlasherConfig::new()
                .with_min_part_size(min_part_size)
                .with_connect_timeout(Duration::from_secs(connect_timeout));
            if no_compress {
                config = config.no_compress();
            }
            if skip_chip_check {
                config = config.skip_chip_check();
            }
            let loader = EsptoolLoader::new().with_program(esptool);

            run_flash(&manifest, &board, port.as_deref(), &ports, &source, config, loader).await
        }
    }
}

fn load_manifest(path: Option<&Path>) -> Result<Manifest, Box<dyn std::error::Error>> {
    let mut manifest = Manifest::builtin();
    if let Some(path) = path {
        manifest.extend(Manifest::load_file(path)?);
        manifest.validate()?;
    }
    Ok(manifest)
}

fn list_boards(manifest: &Manifest) {
    for board in manifest.boards() {
        println!("{:<24} {} ({})", board.id, board.name, board.chip_family);
        if !board.description.is_empty() {
            println!("{:<24} {}", "", board.description);
        }
        for part in &board.parts {
            println!("{:<24}   {:#08x}  {}", "", part.offset, part.label);
        }
    }
}

fn list_ports(filters: &[PortFilter]) -> Result<(), Box<dyn std::error::Error>> {
    let ports = filter_ports(tokio_serial::available_ports()?, filters);
    if ports.is_empty() {
        println!("No serial ports found");
    }
    for port in &ports {
        println!("{}", describe_port(port));
    }
    Ok(())
}

/// Device picker on the terminal. A single candidate is taken as is.
fn prompt_for_port(ports: &[SerialPortInfo]) -> Option<usize> {
    if ports.len() == 1 {
        println!("Using {}", describe_port(&ports[0]));
        return Some(0);
    }

    println!("Select a serial port:");
    for (index, port) in ports.iter().enumerate() {
        println!("  [{}] {}", index + 1, describe_port(port));
    }
    print!("Port number (empty to cancel): ");
    io::stdout().flush().ok()?;

    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer).ok()?;
    let choice: usize = answer.trim().parse().ok()?;
    choice.checked_sub(1)
}

fn open_transport(
    port: Option<&str>,
    ports: &PortArgs,
) -> Result<Option<Transport>, Box<dyn std::error::Error>> {
    let Some(name) = port else {
        return Ok(select_transport(&ports.filters(), &mut prompt_for_port)?);
    };

    // Prefer the enumerated entry so USB details show up in the logs.
    let known = tokio_serial::available_ports()
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.port_name == name);
    Ok(Some(match known {
        Some(info) => Transport::new(info),
        None => Transport::from_name(name),
    }))
}

fn part_source(source: &SourceArgs) -> Result<AnySource, Box<dyn std::error::Error>> {
    match (&source.base_url, &source.firmware_dir) {
        (Some(url), _) => Ok(AnySource::Http(HttpSource::with_base(url)?)),
        (None, Some(dir)) => Ok(AnySource::Dir(DirSource::new(dir))),
        (None, None) => Err("either --base-url or --firmware-dir is required".into()),
    }
}

async fn run_flash(
    manifest: &Manifest,
    board: &str,
    port: Option<&str>,
    ports: &PortArgs,
    source: &SourceArgs,
    config: FlasherConfig,
    loader: EsptoolLoader,
) -> Result<(), Box<dyn std::error::Error>> {
    let board = manifest.require(board)?;
    let source = part_source(source)?;

    let Some(mut transport) = open_transport(port, ports)? else {
        println!("No port selected.");
        return Ok(());
    };

    log::info!("Using {}", describe_port(transport.port_info()));
    let mut flasher = Flasher::new(board, config, loader, source)?;
    let session = flasher.session();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Cancelling after the current stage...");
            session.cancel();
        }
    });

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos:>3}% {msg}")?
            .progress_chars("#>-"),
    );

    let result = {
        let mut events = FlashEvents::new(
            |line| pb.println(line),
            |progress| {
                pb.set_position(progress.percentage as u64);
                match progress.stage {
                    FlashStage::Flashing | FlashStage::Verifying if progress.total_parts > 0 => {
                        pb.set_message(format!(
                            "{} part {}/{}",
                            progress.stage,
                            progress.current_part + 1,
                            progress.total_parts
                        ))
                    }
                    stage => pb.set_message(stage.to_string()),
                }
            },
        );
        flasher.run(&mut transport, &mut events).await
    };

    match result {
        Ok(()) => {
            pb.finish_with_message("done");
            Ok(())
        }
        Err(e) => {
            pb.abandon_with_message("failed");
            Err(e.into())
        }
    }
}
