//! 适配器驱动接口
//!
//! 会话层只通过这里的两个 trait 与硬件交互，真实的 Bus Pirate 串口驱动
//! 和模拟 EEPROM 都实现它们。

use crate::{Result, SessionConfig, Speed};

/// Bit-bang I2C primitives offered by a bus adapter.
pub trait BusAdapter: Send {
    /// 进入原始 bit-bang 模式
    fn enter_bitbang(&mut self) -> Result<()>;

    /// 从 bit-bang 模式进入 I2C 模式
    fn enter_i2c(&mut self) -> Result<()>;

    /// 设置电源和上拉电阻
    fn configure(&mut self, power: bool, pull_up: bool) -> Result<()>;

    /// 设置 I2C 总线速度
    fn set_speed(&mut self, speed: Speed) -> Result<()>;

    /// 发送 `write` 后读回 `read_len` 字节，作为一次原子交换
    fn write_then_read(&mut self, write: &[u8], read_len: usize) -> Result<Vec<u8>>;

    /// 退出 I2C 模式并让适配器回到普通终端模式
    fn hw_reset(&mut self) -> Result<()>;
}

/// Opens the link to an adapter for one job.
pub trait AdapterFactory: Send + Sync {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn BusAdapter>>;
}

impl<F> AdapterFactory for F
where
    F: Fn(&SessionConfig) -> Result<Box<dyn BusAdapter>> + Send + Sync,
{
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn BusAdapter>> {
        self(config)
    }
}
