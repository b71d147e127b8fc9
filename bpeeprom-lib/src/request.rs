//! Job requests as a front end collects them.
//!
//! A [`JobRequest`] carries the raw, user-facing values (hex address
//! string, size preset name, flags). [`JobRequest::into_parts`] validates
//! them and produces the immutable [`TransferJob`] and [`SessionConfig`]
//! handed to the controller.

use crate::engine::PageLayout;
use crate::utils::Utils;
use crate::{DeviceAddress, Error, JobKind, Result, SessionConfig, Speed, TransferJob};
use std::fmt;
use std::str::FromStr;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator};

/// Common single-address-byte EEPROM parts.
#[derive(EnumString, Display, EnumIter, Debug, Clone, Copy, PartialEq, Eq)]
#[strum(ascii_case_insensitive)]
pub enum EepromModel {
    #[strum(serialize = "24C01")]
    C01,
    #[strum(serialize = "24C02")]
    C02,
    #[strum(serialize = "24C04")]
    C04,
    #[strum(serialize = "24C08")]
    C08,
    #[strum(serialize = "24C16")]
    C16,
    #[strum(serialize = "24C32")]
    C32,
    #[strum(serialize = "24C64")]
    C64,
    #[strum(serialize = "24C128")]
    C128,
    #[strum(serialize = "24C256")]
    C256,
}

impl EepromModel {
    pub fn size(self) -> usize {
        match self {
            EepromModel::C01 => 128,
            EepromModel::C02 => 256,
            EepromModel::C04 => 512,
            EepromModel::C08 => 1024,
            EepromModel::C16 => 2048,
            EepromModel::C32 => 4096,
            EepromModel::C64 => 8192,
            EepromModel::C128 => 16384,
            EepromModel::C256 => 32768,
        }
    }

    /// `"24C02 (256B)"`-style listing of every preset.
    pub fn catalog() -> Vec<String> {
        EepromModel::iter()
            .map(|m| format!("{} ({}B)", m, m.size()))
            .collect()
    }
}

/// Device size: a named preset or an explicit byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeSpec {
    Preset(EepromModel),
    Bytes(usize),
}

impl SizeSpec {
    pub const DEFAULT: SizeSpec = SizeSpec::Preset(EepromModel::C02);

    pub fn bytes(self) -> usize {
        match self {
            SizeSpec::Preset(model) => model.size(),
            SizeSpec::Bytes(n) => n,
        }
    }
}

impl Default for SizeSpec {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl FromStr for SizeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(model) = EepromModel::from_str(s.trim()) {
            return Ok(SizeSpec::Preset(model));
        }
        Utils::str_to_usize(s)
            .map(SizeSpec::Bytes)
            .map_err(|e| Error::invalid_input(format!("Invalid size '{}': {}", s, e)))
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SizeSpec::Preset(model) => write!(f, "{} ({}B)", model, model.size()),
            SizeSpec::Bytes(n) => write!(f, "{}B", n),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobRequest {
    pub operation: JobKind,
    pub port: String,
    pub speed: Speed,
    pub address: String,
    pub size: SizeSpec,
    pub page_size: usize,
    pub power: bool,
    pub pull_up: bool,
    pub verify: bool,
    /// Only used by writes.
    pub payload: Vec<u8>,
}

impl JobRequest {
    pub fn new(operation: JobKind, port: impl Into<String>) -> Self {
        Self {
            operation,
            port: port.into(),
            speed: Speed::default(),
            address: DeviceAddress::DEFAULT.to_string(),
            size: SizeSpec::DEFAULT,
            page_size: PageLayout::DEFAULT_PAGE_SIZE,
            power: false,
            pull_up: false,
            verify: false,
            payload: Vec::new(),
        }
    }

    pub fn into_parts(self) -> Result<(TransferJob, SessionConfig)> {
        let address: DeviceAddress = self.address.parse()?;

        let job = match self.operation {
            JobKind::Read => {
                TransferJob::read(address, PageLayout::new(self.page_size, self.size.bytes())?)
            }
            JobKind::Write => TransferJob::write(address, self.page_size, self.payload)?,
            JobKind::Erase => {
                TransferJob::erase(address, PageLayout::new(self.page_size, self.size.bytes())?)
            }
        }
        .with_verify(self.verify);

        let config = SessionConfig {
            speed: self.speed,
            power: self.power,
            pull_up: self.pull_up,
            ..SessionConfig::new(self.port)
        };
        Ok((job, config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn size_presets_and_numbers() {
        assert_eq!("24c256".parse::<SizeSpec>().unwrap().bytes(), 32768);
        assert_eq!("24C01".parse::<SizeSpec>().unwrap().bytes(), 128);
        assert_eq!("1000".parse::<SizeSpec>().unwrap(), SizeSpec::Bytes(1000));
        assert_eq!("4K".parse::<SizeSpec>().unwrap().bytes(), 4096);
        assert!("huge".parse::<SizeSpec>().is_err());
        assert!(matches!(
            "0xFFFFFFFFFFFFFFFFK".parse::<SizeSpec>(),
            Err(Error::InvalidInput(_))
        ));
        assert_eq!(SizeSpec::default().bytes(), 256);
    }

    #[test]
    fn catalog_lists_all_models() {
        let catalog = EepromModel::catalog();
        assert_eq!(catalog.len(), 9);
        assert_eq!(catalog[1], "24C02 (256B)");
    }

    #[test]
    fn read_request_builds_job_and_config() {
        let mut req = JobRequest::new(JobKind::Read, "/dev/ttyUSB0");
        req.address = "0xA2".into();
        req.size = SizeSpec::Bytes(512);
        req.speed = Speed::Khz400;
        req.power = true;

        let (job, config) = req.into_parts().unwrap();
        assert_eq!(job.kind, JobKind::Read);
        assert_eq!(job.address.read_byte(), 0xA3);
        assert_eq!(job.layout.total_size(), 512);
        assert_eq!(config.port_name, "/dev/ttyUSB0");
        assert_eq!(config.speed, Speed::Khz400);
        assert!(config.power);
        assert!(!config.pull_up);
    }

    #[test]
    fn write_request_sizes_layout_from_payload() {
        let mut req = JobRequest::new(JobKind::Write, "COM3");
        req.payload = vec![1; 10];
        req.page_size = 8;
        let (job, _) = req.into_parts().unwrap();
        assert_eq!(job.layout.total_size(), 10);
        assert_eq!(job.layout.page_size(), 8);
        assert_eq!(job.layout.chunk_count(), 2);
    }

    #[test]
    fn bad_address_or_page_size_is_rejected() {
        let mut req = JobRequest::new(JobKind::Erase, "COM3");
        req.address = "nope".into();
        assert!(req.into_parts().is_err());

        let mut req = JobRequest::new(JobKind::Erase, "COM3");
        req.page_size = 0;
        assert!(req.into_parts().is_err());
    }
}
