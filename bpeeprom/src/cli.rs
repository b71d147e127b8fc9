use anyhow::{Result, anyhow, bail};
use bpeeprom_lib::Speed;
use bpeeprom_lib::request::SizeSpec;
use clap::{Parser, Subcommand};
use std::str::FromStr;
use std::time::Duration;

use crate::config::BpConfig;

/// Settings after CLI arguments have been layered over the config file.
#[derive(Debug, Clone)]
pub struct MergedConfig {
    pub port: String,
    pub speed: Speed,
    pub address: String,
    pub size: SizeSpec,
    pub page_size: usize,
    pub power: bool,
    pub pull_up: bool,
    pub verify: bool,
    pub quiet: bool,
    pub simulate: bool,
    pub timeout: Duration,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Bus Pirate I2C EEPROM programmer", long_about = None)]
pub struct Cli {
    /// JSON configuration file path
    #[arg(long = "config", short = 'f')]
    pub config: Option<String>,

    /// Serial port the Bus Pirate is attached to
    #[arg(short = 'p', long = "port")]
    pub port: Option<String>,

    /// I2C bus speed (default: 100kHz)
    #[arg(short = 's', long = "speed", value_enum)]
    pub speed: Option<Speed>,

    /// EEPROM I2C address in hex, e.g. 0xA0 (default: 0xA0)
    #[arg(short = 'a', long = "address")]
    pub address: Option<String>,

    /// EEPROM size: a part name such as 24C02, or a byte count (default: 24C02)
    #[arg(long = "size")]
    pub size: Option<String>,

    /// Page size in bytes, 1..=256 (default: 4)
    #[arg(long = "page-size")]
    pub page_size: Option<usize>,

    /// Enable the Bus Pirate power supplies
    #[arg(long = "power")]
    pub power: bool,

    /// Enable the Bus Pirate pull-up resistors
    #[arg(long = "pull-up")]
    pub pull_up: bool,

    /// Read the device back after write/erase and compare
    #[arg(long = "verify")]
    pub verify: bool,

    /// Per-exchange timeout in milliseconds (default: 5000)
    #[arg(long = "timeout")]
    pub timeout_ms: Option<u64>,

    /// Run against a simulated adapter instead of a serial port
    #[arg(long = "simulate")]
    pub simulate: bool,

    /// Suppress progress bar output (default: false)
    #[arg(short = 'q', long = "quiet")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Read the EEPROM into a raw binary file
    #[command(name = "read")]
    Read(Read),

    /// Write a raw binary file to the EEPROM
    #[command(name = "write")]
    Write(Write),

    /// Fill the EEPROM with 0xFF
    #[command(name = "erase")]
    Erase,

    /// List available serial ports
    #[command(name = "ports")]
    Ports,

    /// List known EEPROM size presets
    #[command(name = "sizes")]
    Sizes,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Read the EEPROM into a raw binary file")]
pub struct Read {
    /// Output file
    pub output: Option<String>,

    /// Print a hex dump of the image
    #[arg(long = "print")]
    pub print: bool,
}

#[derive(Parser, Debug, Clone)]
#[command(about = "Write a raw binary file to the EEPROM")]
pub struct Write {
    /// Input file
    #[arg(required = true)]
    pub input: String,
}

/// Merge CLI arguments with configuration file, CLI args take precedence
pub fn merge_config(args: &Cli, config: Option<BpConfig>) -> Result<MergedConfig> {
    let base_config = config.unwrap_or_else(BpConfig::with_defaults);

    let speed = match args.speed {
        Some(s) => s,
        None => base_config
            .parse_speed()
            .map_err(|e| anyhow!("Invalid speed in config: {}", e))?,
    };

    let size = match &args.size {
        Some(s) => SizeSpec::from_str(s)?,
        None => base_config
            .parse_size()
            .map_err(|e| anyhow!("Invalid size in config: {}", e))?,
    };

    let address = args
        .address
        .clone()
        .unwrap_or_else(|| base_config.address.clone());
    let page_size = args.page_size.unwrap_or(base_config.page_size);
    let timeout_ms = args.timeout_ms.unwrap_or(base_config.timeout_ms);

    let mut port = args
        .port
        .clone()
        .unwrap_or_else(|| base_config.port.clone());
    if port.is_empty() {
        if !args.simulate {
            bail!("Port must be specified either via --port or in config file");
        }
        port = "simulated".to_string();
    }

    Ok(MergedConfig {
        port,
        speed,
        address,
        size,
        page_size,
        power: args.power || base_config.power,
        pull_up: args.pull_up || base_config.pull_up,
        verify: args.verify || base_config.verify,
        quiet: args.quiet || base_config.quiet,
        simulate: args.simulate,
        timeout: Duration::from_millis(timeout_ms),
    })
}

/// Determine which command to execute from CLI args or config file
#[derive(Debug)]
pub enum CommandSource {
    Cli(Commands),
    Config(BpConfig),
}

pub fn get_command_source(args: &Cli, config: Option<BpConfig>) -> Result<CommandSource> {
    match (&args.command, config) {
        (Some(cmd), _) => Ok(CommandSource::Cli(cmd.clone())),
        (None, Some(cfg)) if cfg.command_count() == 1 => Ok(CommandSource::Config(cfg)),
        _ => {
            bail!("No command specified. Use a subcommand or provide a config file with a command.")
        }
    }
}
