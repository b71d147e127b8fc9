//! 适配器会话
//!
//! 会话负责进入 bit-bang / I2C 模式、应用电源、上拉和速度设置，并保证
//! 每个会话最多执行一次复位：要么由调用方显式调用
//! [`Session::reset_to_normal`]，要么在 `Drop` 时兜底执行。

use crate::adapter::{AdapterFactory, BusAdapter};
use crate::{Error, Result, SessionConfig};

/// 单次原子交换原语，传输引擎只依赖这一个接口
pub trait RawTransfer {
    /// 发送 `bytes` 的前 `write_count` 字节，然后读回 `read_count` 字节
    fn transfer_raw(&mut self, write_count: usize, read_count: usize, bytes: &[u8])
    -> Result<Vec<u8>>;
}

pub struct Session {
    adapter: Box<dyn BusAdapter>,
    config: SessionConfig,
    released: bool,
}

impl Session {
    /// 打开端口并把适配器切换到已配置的 I2C 模式
    ///
    /// 端口已打开但模式切换失败时，会话在返回错误前被丢弃，从而复位一次。
    pub fn open(factory: &dyn AdapterFactory, config: &SessionConfig) -> Result<Self> {
        let adapter = factory.connect(config).map_err(into_connection)?;
        let mut session = Self {
            adapter,
            config: config.clone(),
            released: false,
        };
        session.enter_modes().map_err(into_connection)?;
        Ok(session)
    }

    fn enter_modes(&mut self) -> Result<()> {
        self.adapter.enter_bitbang()?;
        self.adapter.enter_i2c()?;
        self.adapter
            .configure(self.config.power, self.config.pull_up)?;
        self.adapter.set_speed(self.config.speed)?;
        tracing::debug!(
            "session ready on {} ({}, power={}, pull_up={})",
            self.config.port_name,
            self.config.speed,
            self.config.power,
            self.config.pull_up
        );
        Ok(())
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 复位适配器到普通模式，每个会话只会真正执行一次
    pub fn reset_to_normal(&mut self) -> Result<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.adapter.hw_reset()
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl RawTransfer for Session {
    fn transfer_raw(
        &mut self,
        write_count: usize,
        read_count: usize,
        bytes: &[u8],
    ) -> Result<Vec<u8>> {
        if self.released {
            return Err(Error::protocol("session already reset"));
        }
        let Some(write) = bytes.get(..write_count) else {
            return Err(Error::invalid_input(format!(
                "write count {} exceeds buffer of {} bytes",
                write_count,
                bytes.len()
            )));
        };
        let response = self.adapter.write_then_read(write, read_count)?;
        if response.len() != read_count {
            return Err(Error::protocol(format!(
                "expected {} bytes, got {}",
                read_count,
                response.len()
            )));
        }
        Ok(response)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.reset_to_normal() {
                tracing::warn!("Reset error: {}", e);
            }
        }
    }
}

fn into_connection(err: Error) -> Error {
    match err {
        Error::Connection(_) => err,
        other => Error::connection(other.to_string()),
    }
}
