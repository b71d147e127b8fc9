//! Bus Pirate 二进制 bit-bang 协议驱动

use crate::adapter::{AdapterFactory, BusAdapter};
use crate::{Error, Result, SessionConfig, Speed};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

/// 二进制模式命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 复位到 bit-bang 模式（在 I2C 模式中为退出）
    BitBang,
    EnterI2c,
    Configure { power: bool, pull_up: bool },
    SetSpeed(Speed),
    WriteThenRead { write_len: u16, read_len: u16 },
    HardwareReset,
}

impl Command {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Command::BitBang => vec![0x00],
            Command::EnterI2c => vec![0x02],
            Command::Configure { power, pull_up } => {
                vec![0x40 | (u8::from(*power) << 3) | (u8::from(*pull_up) << 2)]
            }
            Command::SetSpeed(speed) => vec![0x60 | speed.code()],
            Command::WriteThenRead {
                write_len,
                read_len,
            } => {
                let mut bytes = vec![0x08];
                bytes.extend_from_slice(&write_len.to_be_bytes());
                bytes.extend_from_slice(&read_len.to_be_bytes());
                bytes
            }
            Command::HardwareReset => vec![0x0F],
        }
    }
}

/// Bus Pirate attached to any byte stream (normally a serial port).
pub struct BusPirate<P> {
    port: P,
    timeout: Duration,
}

impl<P: Read + Write> BusPirate<P> {
    const BBIO_BANNER: &'static [u8] = b"BBIO1";
    const I2C_BANNER: &'static [u8] = b"I2C1";
    const BBIO_ATTEMPTS: usize = 20;
    const STATUS_OK: u8 = 0x01;

    pub fn new(port: P, timeout: Duration) -> Self {
        Self { port, timeout }
    }

    pub fn into_inner(self) -> P {
        self.port
    }

    fn send(&mut self, cmd: &Command) -> Result<()> {
        tracing::debug!("command: {:?}", cmd);
        self.port.write_all(&cmd.encode())?;
        self.port.flush()?;
        Ok(())
    }

    fn expect_status(&mut self, context: &str) -> Result<()> {
        let mut status = [0u8; 1];
        self.read_exact_with_timeout(&mut status, context)?;
        if status[0] != Self::STATUS_OK {
            return Err(Error::protocol(format!(
                "{} rejected with status 0x{:02X}",
                context, status[0]
            )));
        }
        Ok(())
    }

    fn expect_banner(&mut self, banner: &[u8], context: &str) -> Result<()> {
        let mut buf = vec![0u8; banner.len()];
        self.read_exact_with_timeout(&mut buf, context)?;
        if buf != banner {
            return Err(Error::protocol(format!(
                "unexpected reply while {}: {:?}",
                context,
                String::from_utf8_lossy(&buf)
            )));
        }
        Ok(())
    }

    /// 在超时时间内等待窗口中出现 `marker`，期间不断发送 `probe`
    fn probe_for_marker(&mut self, probe: &Command, marker: &[u8]) -> Result<bool> {
        let mut window: Vec<u8> = Vec::with_capacity(marker.len());
        let per_attempt = self.timeout / Self::BBIO_ATTEMPTS as u32;

        for _ in 0..Self::BBIO_ATTEMPTS {
            self.send(probe)?;
            let started = Instant::now();
            while started.elapsed() < per_attempt {
                let mut byte = [0u8; 1];
                match self.port.read(&mut byte) {
                    Ok(0) => std::thread::sleep(Duration::from_millis(1)),
                    Ok(_) => {
                        window.push(byte[0]);
                        if window.len() > marker.len() {
                            window.remove(0);
                        }
                        if window == marker {
                            return Ok(true);
                        }
                    }
                    Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                        break;
                    }
                    Err(e) if e.kind() == ErrorKind::Interrupted => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(false)
    }

    fn read_exact_with_timeout(&mut self, buf: &mut [u8], context: &str) -> Result<()> {
        if buf.is_empty() {
            return Ok(());
        }

        let mut offset = 0;
        let mut last_activity = Instant::now();

        while offset < buf.len() {
            match self.port.read(&mut buf[offset..]) {
                Ok(0) => {
                    if last_activity.elapsed() > self.timeout {
                        return Err(Error::timeout(format!("waiting for {}", context)));
                    }
                    std::thread::sleep(Duration::from_millis(1));
                }
                Ok(n) => {
                    offset += n;
                    last_activity = Instant::now();
                }
                Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    if last_activity.elapsed() > self.timeout {
                        return Err(Error::timeout(format!("waiting for {}", context)));
                    }
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(())
    }
}

impl<P: Read + Write + Send> BusAdapter for BusPirate<P> {
    fn enter_bitbang(&mut self) -> Result<()> {
        if self.probe_for_marker(&Command::BitBang, Self::BBIO_BANNER)? {
            Ok(())
        } else {
            Err(Error::connection("adapter did not answer BBIO1"))
        }
    }

    fn enter_i2c(&mut self) -> Result<()> {
        self.send(&Command::EnterI2c)?;
        self.expect_banner(Self::I2C_BANNER, "entering I2C mode")
    }

    fn configure(&mut self, power: bool, pull_up: bool) -> Result<()> {
        self.send(&Command::Configure { power, pull_up })?;
        self.expect_status("configure peripherals")
    }

    fn set_speed(&mut self, speed: Speed) -> Result<()> {
        self.send(&Command::SetSpeed(speed))?;
        self.expect_status("set speed")
    }

    fn write_then_read(&mut self, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        let write_len = u16::try_from(write.len())
            .map_err(|_| Error::invalid_input(format!("write of {} bytes too long", write.len())))?;
        let read_len_u16 = u16::try_from(read_len)
            .map_err(|_| Error::invalid_input(format!("read of {} bytes too long", read_len)))?;

        self.send(&Command::WriteThenRead {
            write_len,
            read_len: read_len_u16,
        })?;
        self.port.write_all(write)?;
        self.port.flush()?;

        let mut status = [0u8; 1];
        self.read_exact_with_timeout(&mut status, "write-then-read status")?;
        if status[0] != Self::STATUS_OK {
            return Err(Error::protocol(format!(
                "device did not acknowledge 0x{:02X}",
                write.first().copied().unwrap_or_default()
            )));
        }

        let mut data = vec![0u8; read_len];
        self.read_exact_with_timeout(&mut data, "read data")?;
        Ok(data)
    }

    fn hw_reset(&mut self) -> Result<()> {
        self.send(&Command::BitBang)?;
        std::thread::sleep(Duration::from_millis(10));
        self.send(&Command::HardwareReset)?;
        std::thread::sleep(Duration::from_millis(100));
        Ok(())
    }
}

/// Opens the configured serial port and wraps it in a [`BusPirate`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialFactory;

impl AdapterFactory for SerialFactory {
    fn connect(&self, config: &SessionConfig) -> Result<Box<dyn BusAdapter>> {
        let port: Box<dyn SerialPort> = serialport::new(&config.port_name, config.baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| {
                Error::connection(format!("failed to open {}: {}", config.port_name, e))
            })?;
        port.clear(serialport::ClearBuffer::All)?;
        tracing::info!("Opened serial port {} at {} baud", config.port_name, config.baud);
        Ok(Box::new(BusPirate::new(port, config.timeout)))
    }
}
