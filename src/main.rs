//! RedLion PXU CLI
//!
//! A command-line interface for supervising a RedLion PXU process
//! controller over Modbus RTU (serial).
//!
//! This tool allows users to:
//! - Read the live process state (process value, setpoint, outputs, tuning
//!   parameters, run status).
//! - Read the device identity (model, firmware version).
//! - Read stored temperature/time profiles with all their segments.
//! - Update the active setpoint and start or stop the controller.
//! - Continuously poll the process state in a watch loop.
//! - Serve the process state over HTTP for remote polling.
//! - Run every command against an in-memory mock when no device is attached.
//!
//! The CLI leverages the `pxu_lib` crate for protocol definitions and
//! controller operations.

use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Confirm;
use flexi_logger::{Logger, LoggerHandle};
use log::*;
use pxu_lib::client::Pxu;
use pxu_lib::transport::{MockTransport, RegisterTransport, SerialConfig, SerialTransport};
use std::net::SocketAddr;
use std::panic;

mod api;
mod commandline;

fn logging_init(loglevel: LevelFilter) -> LoggerHandle {
    let log_handle = Logger::try_with_env_or_str(loglevel.as_str())
        .expect("Cannot init logging")
        .start()
        .expect("Cannot start logging");

    panic::set_hook(Box::new(|panic_info| {
        let (filename, line, column) = panic_info
            .location()
            .map(|loc| (loc.file(), loc.line(), loc.column()))
            .unwrap_or(("<unknown_file>", 0, 0)); // Provide defaults

        let cause_str = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            *s
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.as_str()
        } else {
            "<unknown_panic_cause>"
        };

        error!(
            target: "panic",
            "Thread '{}' panicked at '{}': {}:{} - Cause: {}",
            std::thread::current().name().unwrap_or("<unnamed>"),
            filename,
            line,
            column,
            cause_str
        );
    }));
    log_handle
}

/// Opens the register transport selected by the connection flags.
fn open_transport(args: &commandline::CliArgs) -> Result<Box<dyn RegisterTransport>> {
    if args.mock {
        info!("using mock transport impersonating the device");
        return Ok(Box::new(MockTransport::seeded()));
    }

    let mut config = SerialConfig::new(&args.device);
    config.baud_rate = args.baud_rate;
    config.timeout = args.timeout;
    info!(
        "connecting via RTU to device {} (unit: {}, baud: {})...",
        args.device, args.unit, args.baud_rate
    );
    let transport = SerialTransport::open(&config)
        .with_context(|| format!("Cannot open serial port {}", args.device))?;
    Ok(Box::new(transport))
}

fn print_stats(pxu: &mut Pxu) -> Result<()> {
    let stats = pxu.read_stats().with_context(|| "Cannot read stats")?;
    println!("{stats}");
    Ok(())
}

fn print_profile(pxu: &mut Pxu, id: u8) -> Result<()> {
    let profile = pxu
        .read_profile(id)
        .with_context(|| format!("Cannot read profile {id}"))?;
    println!("{profile}");
    Ok(())
}

fn main() -> Result<()> {
    let args = commandline::CliArgs::parse();

    let _log_handle = logging_init(args.verbose.log_level_filter());
    info!(
        "PXU CLI started. Log level: {}",
        args.verbose.log_level_filter()
    );

    let transport = open_transport(&args)?;
    let mut pxu = Pxu::new(args.unit, transport, args.timeout, args.retries)
        .with_context(|| format!("Failed to create controller for unit {}", args.unit))?;

    match &args.command {
        commandline::CliCommands::Stats => {
            info!("Executing: Read Stats");
            print_stats(&mut pxu)?;
        }
        commandline::CliCommands::Info => {
            info!("Executing: Read Info");
            let info = pxu.read_info().with_context(|| "Cannot read device info")?;
            println!("{info}");
        }
        commandline::CliCommands::Profile { id, all } => {
            if *all {
                info!("Executing: Read All Profiles");
                for id in 0..=pxu_lib::protocol::PROFILE_ID_MAX {
                    print_profile(&mut pxu, id)?;
                }
            } else {
                let id = id.expect("clap enforces an id unless --all is given");
                info!("Executing: Read Profile {id}");
                print_profile(&mut pxu, id)?;
            }
        }
        commandline::CliCommands::Watch { poll_interval } => {
            info!("Starting watch loop: interval={poll_interval:?}");
            loop {
                print_stats(&mut pxu)?;
                std::thread::sleep(*poll_interval);
            }
        }
        commandline::CliCommands::SetSetpoint { value, yes } => {
            info!("Executing: Update Setpoint to {value}");
            let truncated = pxu_lib::protocol::decimal_decode(
                pxu_lib::protocol::decimal_encode(*value),
            );
            if !yes
                && !Confirm::new()
                    .with_prompt(format!(
                        "Write setpoint {truncated:.1} to unit {}?",
                        args.unit
                    ))
                    .default(false)
                    .show_default(true)
                    .interact()?
            {
                info!("Setpoint update aborted by user.");
                return Ok(());
            }
            pxu.update_setpoint(*value)
                .with_context(|| format!("Failed to update setpoint to {value}"))?;
            println!("Setpoint updated to {truncated:.1} (device stores tenths, values are truncated).");
        }
        commandline::CliCommands::Start => {
            info!("Executing: Start");
            pxu.start()
                .with_context(|| format!("Failed to start unit {}", args.unit))?;
            println!("Unit {} started.", args.unit);
        }
        commandline::CliCommands::Stop { yes } => {
            info!("Executing: Stop");
            if !yes
                && !Confirm::new()
                    .with_prompt(format!(
                        "Stop unit {}? Any executing profile is aborted.",
                        args.unit
                    ))
                    .default(false)
                    .show_default(true)
                    .interact()?
            {
                info!("Stop aborted by user.");
                return Ok(());
            }
            pxu.stop()
                .with_context(|| format!("Failed to stop unit {}", args.unit))?;
            println!("Unit {} stopped.", args.unit);
        }
        commandline::CliCommands::Serve { listen } => {
            let listen = listen.unwrap_or_else(|| {
                SocketAddr::from(([0, 0, 0, 0], 5000 + u16::from(args.unit)))
            });
            let runtime = tokio::runtime::Runtime::new()
                .with_context(|| "Failed to start async runtime")?;
            runtime.block_on(api::serve(listen, pxu))?;
        }
    }

    Ok(())
}
