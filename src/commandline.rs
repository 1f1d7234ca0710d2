use clap::{Parser, Subcommand};
use clap_verbosity_flag::{Verbosity, WarnLevel};
use std::net::SocketAddr;
use std::time::Duration;

fn default_device_name() -> String {
    if cfg!(target_os = "windows") {
        String::from("COM3")
    } else {
        String::from("/dev/ttyUSB0")
    }
}

fn parse_unit_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid unit id format: {e}"))
}

fn parse_profile_id(s: &str) -> Result<u8, String> {
    clap_num::maybe_hex::<u8>(s).map_err(|e| format!("Invalid profile id format: {e}"))
}

fn parse_setpoint(s: &str) -> Result<f64, String> {
    s.parse::<f64>()
        .map_err(|e| format!("Invalid setpoint value format: {e}"))
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum CliCommands {
    /// Read and display a snapshot of the live process state.
    Stats,

    /// Read and display the device identity (model and firmware version).
    Info,

    /// Read and display a stored temperature/time profile.
    Profile {
        /// Profile id to read (0 to 16). Omit with --all to dump every profile.
        #[arg(value_parser = parse_profile_id, required_unless_present = "all")]
        id: Option<u8>,

        /// Read all profiles instead of a single one.
        #[arg(long, conflicts_with = "id")]
        all: bool,
    },

    /// Continuously poll the process state and print each snapshot.
    Watch {
        /// Interval between polls (e.g. "2s", "500ms").
        #[arg(value_parser = humantime::parse_duration, short, long, default_value = "2sec")]
        poll_interval: Duration,
    },

    /// Write a new active setpoint.
    /// The device stores tenths, so the value is truncated to one decimal
    /// digit, not rounded.
    #[clap(verbatim_doc_comment)]
    SetSetpoint {
        /// Setpoint in the device's configured display unit.
        #[arg(value_parser = parse_setpoint)]
        value: f64,

        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Put the controller into run mode.
    Start,

    /// Stop the controller output.
    /// Stopping aborts any profile the unit is executing, so this prompts
    /// for confirmation unless --yes is given.
    #[clap(verbatim_doc_comment)]
    Stop {
        /// Skip the confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Serve the process state over HTTP as JSON (GET /v1/stats).
    Serve {
        /// Listen address. Defaults to 0.0.0.0:<5000 + unit id>.
        #[arg(long)]
        listen: Option<SocketAddr>,
    },
}

const fn about_text() -> &'static str {
    "RedLion PXU CLI - supervise a PXU process controller via Modbus RTU."
}

#[derive(Parser, Debug)]
#[command(name="pxuctl", author, version, about=about_text(), long_about = None, propagate_version = true)]
pub struct CliArgs {
    /// Configure verbosity of logging output.
    /// -v for info, -vv for debug, -vvv for trace. Default is off.
    #[command(flatten)]
    pub verbose: Verbosity<WarnLevel>,

    /// Serial port device name.
    /// Examples: "/dev/ttyUSB0" (Linux), "COM3" (Windows).
    #[arg(short, long, default_value_t = default_device_name())]
    pub device: String,

    /// Baud rate for serial communication.
    /// Must match the device's configured rate; the factory default is 38400.
    #[arg(long, default_value_t = pxu_lib::transport::DEFAULT_BAUD_RATE)]
    pub baud_rate: u32,

    /// Modbus unit id of the controller on the RS485 bus.
    /// Can be specified in decimal or hexadecimal (e.g. "6" or "0x06").
    #[arg(short, long, default_value = "1", value_parser = parse_unit_id)]
    pub unit: u8,

    /// Use an in-memory mock transport impersonating the device.
    /// Lets every command run without hardware attached.
    #[arg(long)]
    pub mock: bool,

    /// Modbus I/O timeout for read/write operations.
    /// Examples: "1s", "500ms".
    #[arg(global = true, long, default_value = "500ms", value_parser = humantime::parse_duration)]
    pub timeout: Duration,

    /// Additional read attempts after a failed register read.
    #[arg(global = true, long, default_value_t = 3)]
    pub retries: u32,

    /// The command to run against the device.
    #[command(subcommand)]
    pub command: CliCommands,
}
