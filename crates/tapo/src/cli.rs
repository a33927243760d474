use std::time::Duration;

use clap::{Parser, Subcommand};

pub fn parse_duration(arg: &str) -> Result<Duration, std::num::ParseIntError> {
    let seconds = arg.parse()?;
    Ok(Duration::from_secs(seconds))
}

/// TP-Link Tapo smart plug LAN client
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// TP-Link account username (email).
    /// Can also be set via the TAPO_USERNAME environment variable.
    #[arg(short, long, global = true, env = "TAPO_USERNAME")]
    pub username: Option<String>,

    /// Read the password from stdin.
    /// Useful for scripting: echo "password" | tapo -u user@example.com --password-stdin plug 192.168.1.50 info
    #[arg(long, global = true)]
    pub password_stdin: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Discover devices on the local network
    Discover {
        /// Receive window in seconds
        #[arg(long, value_parser = parse_duration, default_value = "5")]
        timeout: Duration,
    },

    /// Show version information for CLI and core library
    Version,

    /// Operate on a single plug
    Plug {
        /// Target hostname or IP address
        target: String,

        /// HTTP port of the device
        #[arg(short, long, default_value_t = 80)]
        port: u16,

        /// Request timeout in seconds
        #[arg(long, value_parser = parse_duration, default_value = "10")]
        timeout: Duration,

        /// Re-handshake attempts after a forbidden or timed-out session
        #[arg(long, default_value_t = 0)]
        retries_on_forbidden: u32,

        /// Retries after a communication error
        #[arg(long, default_value_t = 0)]
        retries_on_communication_error: u32,

        #[command(subcommand)]
        command: PlugCommand,
    },
}

/// Commands available on a single plug
#[derive(Subcommand)]
pub enum PlugCommand {
    /// Turn the plug on
    On,

    /// Turn the plug off
    Off,

    /// Print whether the plug is on
    IsOn,

    /// Print device information
    Info,

    /// Print time/power usage counters
    Usage,

    /// Print energy meter readings (P110 and other metering models)
    Energy,
}
