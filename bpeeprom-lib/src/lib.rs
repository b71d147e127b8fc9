pub mod adapter;
pub mod buspirate;
pub mod controller;
pub mod engine;
pub mod error;
pub mod event;
pub mod image;
pub mod progress;
pub mod request;
pub mod session;
pub mod sim;
pub mod utils;

pub use crate::error::{Error, Result};
pub use adapter::{AdapterFactory, BusAdapter};
pub use controller::{ControllerState, JobHandle, OperationController};
pub use engine::{CancelToken, PageLayout, TransferEngine};
pub use event::{JobEvent, JobOutcome, JobStatus};
pub use image::ByteImage;
pub use request::{JobRequest, SizeSpec};
pub use session::{RawTransfer, Session};

use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use strum::{Display, EnumString};

/// I2C bus speed supported by the Bus Pirate bit-bang I2C mode.
#[derive(EnumString, Display, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
#[strum(ascii_case_insensitive)]
pub enum Speed {
    #[strum(serialize = "400kHz")]
    #[cfg_attr(feature = "cli", value(name = "400kHz"))]
    Khz400,
    #[default]
    #[strum(serialize = "100kHz")]
    #[cfg_attr(feature = "cli", value(name = "100kHz"))]
    Khz100,
    #[strum(serialize = "50kHz")]
    #[cfg_attr(feature = "cli", value(name = "50kHz"))]
    Khz50,
    #[strum(serialize = "5kHz")]
    #[cfg_attr(feature = "cli", value(name = "5kHz"))]
    Khz5,
}

impl Speed {
    /// Value of the low two bits of the "set speed" command.
    pub fn code(self) -> u8 {
        match self {
            Speed::Khz5 => 0b00,
            Speed::Khz50 => 0b01,
            Speed::Khz100 => 0b10,
            Speed::Khz400 => 0b11,
        }
    }
}

/// What a job does to the device.
#[derive(EnumString, Display, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum JobKind {
    Read,
    Write,
    Erase,
}

/// I2C device address in its 8-bit wire form (7-bit address shifted left).
///
/// The direction bit is always cleared on the stored value and OR-ed in
/// per transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const DEFAULT: DeviceAddress = DeviceAddress(0xA0);

    pub fn new(raw: u8) -> Self {
        Self(raw & 0xFE)
    }

    pub fn base(self) -> u8 {
        self.0
    }

    pub fn write_byte(self) -> u8 {
        self.0
    }

    pub fn read_byte(self) -> u8 {
        self.0 | 0x01
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for DeviceAddress {
    type Err = Error;

    /// Parses a hex address, with or without a `0x` prefix.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        let raw = u8::from_str_radix(digits, 16)
            .map_err(|e| Error::invalid_input(format!("Invalid I2C address '{}': {}", s, e)))?;
        Ok(Self::new(raw))
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Adapter settings captured once when a job starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub port_name: String,
    pub speed: Speed,
    pub power: bool,
    pub pull_up: bool,
    pub baud: u32,
    /// Upper bound for a single command/response exchange.
    pub timeout: Duration,
}

impl SessionConfig {
    pub const DEFAULT_BAUD: u32 = 115_200;
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    pub fn new(port_name: impl Into<String>) -> Self {
        Self {
            port_name: port_name.into(),
            speed: Speed::default(),
            power: false,
            pull_up: false,
            baud: Self::DEFAULT_BAUD,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// A port name the user could not have meant to open.
    pub fn has_valid_port(&self) -> bool {
        let name = self.port_name.trim();
        !name.is_empty() && !name.contains("No ports")
    }
}

/// One user-initiated operation, consumed by a single engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferJob {
    pub kind: JobKind,
    pub address: DeviceAddress,
    pub layout: PageLayout,
    pub payload: Option<Vec<u8>>,
    pub verify: bool,
}

impl TransferJob {
    pub fn read(address: DeviceAddress, layout: PageLayout) -> Self {
        Self {
            kind: JobKind::Read,
            address,
            layout,
            payload: None,
            verify: false,
        }
    }

    pub fn write(address: DeviceAddress, page_size: usize, payload: Vec<u8>) -> Result<Self> {
        let layout = PageLayout::new(page_size, payload.len())?;
        Ok(Self {
            kind: JobKind::Write,
            address,
            layout,
            payload: Some(payload),
            verify: false,
        })
    }

    pub fn erase(address: DeviceAddress, layout: PageLayout) -> Self {
        Self {
            kind: JobKind::Erase,
            address,
            layout,
            payload: None,
            verify: false,
        }
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Bytes to program: the user payload for writes, all 0xFF for erase.
    pub fn program_data(&self) -> Vec<u8> {
        match self.kind {
            JobKind::Erase => vec![0xFF; self.layout.total_size()],
            _ => self.payload.clone().unwrap_or_default(),
        }
    }
}
