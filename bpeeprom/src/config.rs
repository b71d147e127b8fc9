use bpeeprom_lib::request::SizeSpec;
use bpeeprom_lib::{DeviceAddress, PageLayout, Speed};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// 应用程序的默认配置值
pub struct Defaults;

impl Defaults {
    pub const SPEED: &'static str = "100kHz";
    pub const ADDRESS: &'static str = "0xA0";
    pub const SIZE: &'static str = "24C02";
    pub const PAGE_SIZE: usize = PageLayout::DEFAULT_PAGE_SIZE;
    pub const TIMEOUT_MS: u64 = 5000;
}

/// 读取命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadCommandConfig {
    pub path: String,
}

/// 写入命令配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriteCommandConfig {
    pub path: String,
}

/// 擦除命令配置
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EraseCommandConfig {}

/// JSON 配置文件的根结构
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BpConfig {
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_speed")]
    pub speed: String,
    #[serde(default = "default_address")]
    pub address: String,
    #[serde(default = "default_size")]
    pub size: String,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub power: bool,
    #[serde(default)]
    pub pull_up: bool,
    #[serde(default)]
    pub verify: bool,
    #[serde(default)]
    pub quiet: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    // 命令 - 最多存在其中一个
    pub read: Option<ReadCommandConfig>,
    pub write: Option<WriteCommandConfig>,
    pub erase: Option<EraseCommandConfig>,
}

fn default_speed() -> String {
    Defaults::SPEED.to_string()
}
fn default_address() -> String {
    Defaults::ADDRESS.to_string()
}
fn default_size() -> String {
    Defaults::SIZE.to_string()
}
fn default_page_size() -> usize {
    Defaults::PAGE_SIZE
}
fn default_timeout_ms() -> u64 {
    Defaults::TIMEOUT_MS
}

impl BpConfig {
    /// 从 JSON 文件加载配置
    pub fn from_file(path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let content = std::fs::read_to_string(path)?;
        let config: BpConfig = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// 创建一个具有所有默认值的配置
    pub fn with_defaults() -> Self {
        Self {
            port: String::new(),
            speed: Defaults::SPEED.to_string(),
            address: Defaults::ADDRESS.to_string(),
            size: Defaults::SIZE.to_string(),
            page_size: Defaults::PAGE_SIZE,
            power: false,
            pull_up: false,
            verify: false,
            quiet: false,
            timeout_ms: Defaults::TIMEOUT_MS,
            read: None,
            write: None,
            erase: None,
        }
    }

    pub fn parse_speed(&self) -> Result<Speed, String> {
        Speed::from_str(&self.speed).map_err(|_| format!("Invalid speed: {}", self.speed))
    }

    pub fn parse_size(&self) -> Result<SizeSpec, String> {
        SizeSpec::from_str(&self.size).map_err(|e| e.to_string())
    }

    pub fn command_count(&self) -> usize {
        [self.read.is_some(), self.write.is_some(), self.erase.is_some()]
            .iter()
            .filter(|&&x| x)
            .count()
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<(), String> {
        if self.command_count() > 1 {
            return Err(
                "Configuration must contain at most one command (read, write or erase)"
                    .to_string(),
            );
        }

        self.parse_speed()?;
        self.parse_size()?;
        DeviceAddress::from_str(&self.address).map_err(|e| e.to_string())?;

        if self.page_size == 0 || self.page_size > PageLayout::MAX_PAGE_SIZE {
            return Err(format!(
                "Invalid page size {}. Must be 1..={}",
                self.page_size,
                PageLayout::MAX_PAGE_SIZE
            ));
        }

        if let Some(ref read) = self.read
            && read.path.is_empty()
        {
            return Err("read.path must not be empty".to_string());
        }
        if let Some(ref write) = self.write
            && write.path.is_empty()
        {
            return Err("write.path must not be empty".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_config_gets_defaults() {
        let config: BpConfig = serde_json::from_str(r#"{"port": "/dev/ttyUSB0"}"#).unwrap();
        assert_eq!(config.speed, "100kHz");
        assert_eq!(config.address, "0xA0");
        assert_eq!(config.page_size, 4);
        assert_eq!(config.timeout_ms, 5000);
        assert!(config.validate().is_ok());
        assert_eq!(config.command_count(), 0);
    }

    #[test]
    fn erase_section_is_an_empty_object() {
        let config: BpConfig =
            serde_json::from_str(r#"{"port": "COM4", "size": "24C16", "erase": {}}"#).unwrap();
        assert!(config.erase.is_some());
        assert_eq!(config.parse_size().unwrap().bytes(), 2048);
    }

    #[test]
    fn rejects_two_commands() {
        let config: BpConfig = serde_json::from_str(
            r#"{"port": "COM4", "erase": {}, "read": {"path": "dump.bin"}}"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_values() {
        let mut config = BpConfig::with_defaults();
        config.speed = "1MHz".into();
        assert!(config.validate().is_err());

        let mut config = BpConfig::with_defaults();
        config.page_size = 512;
        assert!(config.validate().is_err());

        let mut config = BpConfig::with_defaults();
        config.address = "0xG0".into();
        assert!(config.validate().is_err());
    }
}
