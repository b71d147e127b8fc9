//! Simulated Bus Pirate with a 24Cxx EEPROM on the bus.
//!
//! Used by the test suite and by the CLI `--simulate` flag. The device
//! model follows the 24Cxx datasheets closely enough for the programmer:
//! a one-byte word address, page-rollover on writes, and sequential reads
//! from the internal address pointer.

use crate::adapter::{AdapterFactory, BusAdapter};
use crate::{DeviceAddress, Error, Result, SessionConfig, Speed};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

/// Every adapter primitive the simulator has seen, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdapterCall {
    Connect,
    EnterBitbang,
    EnterI2c,
    Configure { power: bool, pull_up: bool },
    SetSpeed(Speed),
    WriteThenRead { write: Vec<u8>, read_len: usize },
    HwReset,
}

/// Mode-entry step a fault can be attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModeStep {
    Bitbang,
    I2c,
    Configure,
    Speed,
}

/// How an injected fault shows up: a returned error or a panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Error,
    Panic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Terminal,
    BitBang,
    I2c,
}

#[derive(Debug)]
struct Inner {
    memory: Vec<u8>,
    page_size: usize,
    address: DeviceAddress,
    pointer: usize,
    mode: Mode,
    calls: Vec<AdapterCall>,
    data_writes: usize,
    write_fault: Option<(usize, Fault)>,
    mode_fault: Option<(ModeStep, Fault)>,
    panic_on_reset: bool,
    refuse_connect: bool,
    write_latency: Duration,
}

/// Cloneable handle to one simulated adapter and device.
///
/// All clones share the same state, so a test can keep one handle for
/// inspection while the controller owns another.
#[derive(Debug, Clone)]
pub struct SimulatedBus {
    inner: Arc<Mutex<Inner>>,
}

impl SimulatedBus {
    pub fn new(size: usize, page_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                memory: vec![0xFF; size],
                page_size: page_size.max(1),
                address: DeviceAddress::DEFAULT,
                pointer: 0,
                mode: Mode::Terminal,
                calls: Vec::new(),
                data_writes: 0,
                write_fault: None,
                mode_fault: None,
                panic_on_reset: false,
                refuse_connect: false,
                write_latency: Duration::ZERO,
            })),
        }
    }

    pub fn with_address(self, address: DeviceAddress) -> Self {
        self.lock().address = address;
        self
    }

    /// Makes the `n`-th (0-based) data-carrying write NAK.
    pub fn fail_on_write(self, n: usize) -> Self {
        self.lock().write_fault = Some((n, Fault::Error));
        self
    }

    /// Makes the `n`-th (0-based) data-carrying write panic inside the adapter.
    pub fn panic_on_write(self, n: usize) -> Self {
        self.lock().write_fault = Some((n, Fault::Panic));
        self
    }

    /// Makes one mode-entry step fail after the port has been opened.
    pub fn fail_mode_entry(self, step: ModeStep, fault: Fault) -> Self {
        self.lock().mode_fault = Some((step, fault));
        self
    }

    /// Records the reset and then panics.
    pub fn panic_on_reset(self) -> Self {
        self.lock().panic_on_reset = true;
        self
    }

    /// Makes `connect` fail as if the port could not be opened.
    pub fn refuse_connect(self) -> Self {
        self.lock().refuse_connect = true;
        self
    }

    pub fn with_write_latency(self, latency: Duration) -> Self {
        self.lock().write_latency = latency;
        self
    }

    pub fn memory(&self) -> Vec<u8> {
        self.lock().memory.clone()
    }

    pub fn load_memory(&self, data: &[u8]) {
        let mut inner = self.lock();
        let len = inner.memory.len().min(data.len());
        inner.memory[..len].copy_from_slice(&data[..len]);
    }

    pub fn calls(&self) -> Vec<AdapterCall> {
        self.lock().calls.clone()
    }

    pub fn reset_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c == AdapterCall::HwReset)
            .count()
    }

    /// Data writes that reached the device, excluding pointer-only writes.
    pub fn data_writes(&self) -> usize {
        self.lock().data_writes
    }

    pub fn in_terminal_mode(&self) -> bool {
        self.lock().mode == Mode::Terminal
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // 模拟器状态在 panic 后仍然可用
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Inner {
    fn mode_step(&self, step: ModeStep) -> Result<()> {
        match self.mode_fault {
            Some((s, Fault::Error)) if s == step => Err(Error::protocol(format!(
                "no response to {:?} mode entry",
                step
            ))),
            Some((s, Fault::Panic)) if s == step => {
                panic!("adapter fault during {:?} mode entry", step)
            }
            _ => Ok(()),
        }
    }

    fn require_mode(&self, mode: Mode, what: &str) -> Result<()> {
        if self.mode != mode {
            return Err(Error::protocol(format!(
                "{} while adapter is in {:?} mode",
                what, self.mode
            )));
        }
        Ok(())
    }

    fn device_write(&mut self, bytes: &[u8]) -> Result<()> {
        let Some((&word_address, data)) = bytes.split_first() else {
            return Ok(());
        };

        if !data.is_empty() {
            let index = self.data_writes;
            self.data_writes += 1;
            match self.write_fault {
                Some((n, Fault::Error)) if n == index => {
                    return Err(Error::protocol(format!(
                        "device did not acknowledge 0x{:02X}",
                        self.address.write_byte()
                    )));
                }
                Some((n, Fault::Panic)) if n == index => {
                    panic!("adapter fault on data write {}", index)
                }
                _ => {}
            }
        }

        let len = self.memory.len();
        if len == 0 {
            return Ok(());
        }
        let start = word_address as usize % len;
        let page_start = start - start % self.page_size;
        let mut offset = start - page_start;
        for &byte in data {
            let target = (page_start + offset) % len;
            self.memory[target] = byte;
            offset = (offset + 1) % self.page_size;
        }
        self.pointer = (page_start + offset) % len;
        if data.is_empty() {
            self.pointer = start;
        }
        Ok(())
    }

    fn device_read(&mut self, read_len: usize) -> Vec<u8> {
        let len = self.memory.len();
        if len == 0 {
            return vec![0xFF; read_len];
        }
        let mut out = Vec::with_capacity(read_len);
        for _ in 0..read_len {
            out.push(self.memory[self.pointer]);
            self.pointer = (self.pointer + 1) % len;
        }
        out
    }
}

impl BusAdapter for SimulatedBus {
    fn enter_bitbang(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::EnterBitbang);
        inner.mode_step(ModeStep::Bitbang)?;
        inner.mode = Mode::BitBang;
        Ok(())
    }

    fn enter_i2c(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::EnterI2c);
        inner.mode_step(ModeStep::I2c)?;
        inner.require_mode(Mode::BitBang, "enter I2C")?;
        inner.mode = Mode::I2c;
        Ok(())
    }

    fn configure(&mut self, power: bool, pull_up: bool) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::Configure { power, pull_up });
        inner.mode_step(ModeStep::Configure)?;
        inner.require_mode(Mode::I2c, "configure")
    }

    fn set_speed(&mut self, speed: Speed) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::SetSpeed(speed));
        inner.mode_step(ModeStep::Speed)?;
        inner.require_mode(Mode::I2c, "set speed")
    }

    fn write_then_read(&mut self, write: &[u8], read_len: usize) -> Result<Vec<u8>> {
        let latency = {
            let mut inner = self.lock();
            inner.calls.push(AdapterCall::WriteThenRead {
                write: write.to_vec(),
                read_len,
            });
            inner.require_mode(Mode::I2c, "write-then-read")?;

            let Some((&addr, rest)) = write.split_first() else {
                return Ok(Vec::new());
            };
            if addr & 0xFE != inner.address.base() {
                return Err(Error::protocol(format!(
                    "device did not acknowledge 0x{:02X}",
                    addr
                )));
            }
            if addr & 0x01 == 0 {
                inner.device_write(rest)?;
                inner.write_latency
            } else {
                return Ok(inner.device_read(read_len));
            }
        };
        if !latency.is_zero() {
            std::thread::sleep(latency);
        }
        Ok(Vec::new())
    }

    fn hw_reset(&mut self) -> Result<()> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::HwReset);
        inner.mode = Mode::Terminal;
        if inner.panic_on_reset {
            panic!("adapter fault during reset");
        }
        Ok(())
    }
}

impl AdapterFactory for SimulatedBus {
    fn connect(&self, _config: &SessionConfig) -> Result<Box<dyn BusAdapter>> {
        let mut inner = self.lock();
        inner.calls.push(AdapterCall::Connect);
        if inner.refuse_connect {
            return Err(Error::connection("simulated port unavailable"));
        }
        drop(inner);
        Ok(Box::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready(size: usize, page: usize) -> SimulatedBus {
        let mut bus = SimulatedBus::new(size, page);
        bus.enter_bitbang().unwrap();
        bus.enter_i2c().unwrap();
        bus
    }

    #[test]
    fn page_write_rolls_over_inside_page() {
        let mut bus = ready(16, 4);
        bus.write_then_read(&[0xA0, 0x02, 1, 2, 3], 0).unwrap();
        assert_eq!(&bus.memory()[0..4], &[3, 0xFF, 1, 2]);
    }

    #[test]
    fn sequential_read_follows_pointer() {
        let mut bus = ready(8, 4);
        bus.load_memory(&[0, 1, 2, 3, 4, 5, 6, 7]);
        bus.write_then_read(&[0xA0, 0x06], 0).unwrap();
        let data = bus.write_then_read(&[0xA1], 4).unwrap();
        assert_eq!(data, vec![6, 7, 0, 1]);
    }

    #[test]
    fn foreign_address_naks() {
        let mut bus = ready(8, 4);
        assert!(bus.write_then_read(&[0xA2, 0x00, 1], 0).is_err());
    }

    #[test]
    fn transfers_need_i2c_mode() {
        let mut bus = SimulatedBus::new(8, 4);
        assert!(bus.write_then_read(&[0xA1], 1).is_err());
    }

    #[test]
    fn mode_entry_fault_is_reported_at_its_step() {
        let mut bus = SimulatedBus::new(8, 4).fail_mode_entry(ModeStep::Configure, Fault::Error);
        bus.enter_bitbang().unwrap();
        bus.enter_i2c().unwrap();
        assert!(matches!(bus.configure(false, false), Err(Error::Protocol(_))));
    }

    #[test]
    fn scripted_failure_hits_nth_data_write() {
        let mut bus = ready(16, 4).fail_on_write(1);
        bus.write_then_read(&[0xA0, 0x00, 1, 2, 3, 4], 0).unwrap();
        assert!(bus.write_then_read(&[0xA0, 0x04, 5, 6, 7, 8], 0).is_err());
        assert_eq!(bus.data_writes(), 2);
    }
}
