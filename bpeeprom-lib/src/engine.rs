//! 分页写入 / 整体读取传输引擎
//!
//! EEPROM 每次内部写周期最多写入一页，因此写入数据被拆分为若干整页和一个
//! 余数块，每块对应一次 `transfer_raw` 交换，块之间等待固定的写周期时间。

use crate::progress::{ProgressState, Reporter};
use crate::session::RawTransfer;
use crate::{DeviceAddress, Error, JobKind, Result, TransferJob};
use crc::{CRC_32_ISO_HDLC, Crc};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// 页大小与总长度
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    page_size: usize,
    total_size: usize,
}

impl PageLayout {
    pub const MAX_PAGE_SIZE: usize = 256;
    pub const DEFAULT_PAGE_SIZE: usize = 4;

    pub fn new(page_size: usize, total_size: usize) -> Result<Self> {
        if page_size == 0 || page_size > Self::MAX_PAGE_SIZE {
            return Err(Error::invalid_input(format!(
                "page size must be 1..={}, got {}",
                Self::MAX_PAGE_SIZE,
                page_size
            )));
        }
        Ok(Self {
            page_size,
            total_size,
        })
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn full_pages(&self) -> usize {
        self.total_size / self.page_size
    }

    pub fn remainder(&self) -> usize {
        self.total_size % self.page_size
    }

    pub fn chunk_count(&self) -> usize {
        self.total_size.div_ceil(self.page_size)
    }

    /// 按页切分 `payload`，页地址只保留偏移的低 8 位
    pub fn chunks<'a>(&self, payload: &'a [u8]) -> impl Iterator<Item = Chunk<'a>> + 'a {
        let page_size = self.page_size;
        payload
            .chunks(page_size)
            .enumerate()
            .map(move |(index, data)| {
                let offset = index * page_size;
                Chunk {
                    index,
                    offset,
                    page_address: (offset & 0xFF) as u8,
                    data,
                    is_full: data.len() == page_size,
                }
            })
    }
}

/// 一次写入交换对应的数据块
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk<'a> {
    pub index: usize,
    pub offset: usize,
    pub page_address: u8,
    pub data: &'a [u8],
    pub is_full: bool,
}

impl Chunk<'_> {
    /// `[设备地址, 页地址] + 数据`
    pub fn command(&self, address: DeviceAddress) -> Vec<u8> {
        let mut buffer = Vec::with_capacity(self.data.len() + 2);
        buffer.push(address.write_byte());
        buffer.push(self.page_address);
        buffer.extend_from_slice(self.data);
        buffer
    }
}

/// 协作式取消标志，只在块之间检查
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct TransferEngine {
    settle_time: Duration,
    cancel: CancelToken,
}

impl TransferEngine {
    /// EEPROM 写周期等待时间
    pub const DEFAULT_SETTLE_TIME: Duration = Duration::from_millis(10);

    const CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

    pub fn new(cancel: CancelToken) -> Self {
        Self {
            settle_time: Self::DEFAULT_SETTLE_TIME,
            cancel,
        }
    }

    pub fn with_settle_time(mut self, settle_time: Duration) -> Self {
        self.settle_time = settle_time;
        self
    }

    /// 执行一个作业，读取时返回读到的数据
    pub fn run<T: RawTransfer + ?Sized>(
        &self,
        link: &mut T,
        job: &TransferJob,
        reporter: &mut Reporter,
    ) -> Result<Option<Vec<u8>>> {
        match job.kind {
            JobKind::Read => {
                let data = self.read(link, job.address, job.layout.total_size(), reporter)?;
                Ok(Some(data))
            }
            JobKind::Write | JobKind::Erase => {
                let data = job.program_data();
                if job.kind == JobKind::Erase {
                    reporter.log(format!(
                        "Erasing {} bytes at address {}",
                        data.len(),
                        job.address
                    ));
                }
                self.write(link, job.address, job.layout.page_size(), &data, reporter)?;
                if job.verify {
                    self.verify(link, job.address, &data, reporter)?;
                }
                Ok(None)
            }
        }
    }

    /// 单次交换读取 `size` 字节，进度一次跳到 100
    pub fn read<T: RawTransfer + ?Sized>(
        &self,
        link: &mut T,
        address: DeviceAddress,
        size: usize,
        reporter: &mut Reporter,
    ) -> Result<Vec<u8>> {
        reporter.log(format!(
            "Reading {} bytes from address {:02X}",
            size,
            address.base()
        ));
        let data = link.transfer_raw(1, size, &[address.read_byte()])?;
        reporter.progress(100);
        Ok(data)
    }

    /// 分页写入 `payload`
    pub fn write<T: RawTransfer + ?Sized>(
        &self,
        link: &mut T,
        address: DeviceAddress,
        page_size: usize,
        payload: &[u8],
        reporter: &mut Reporter,
    ) -> Result<()> {
        let layout = PageLayout::new(page_size, payload.len())?;
        let total = payload.len();
        reporter.log(format!(
            "Writing {} bytes to EEPROM with page size {}",
            total, page_size
        ));

        let mut written = 0usize;
        for chunk in layout.chunks(payload) {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled {
                    chunks: chunk.index,
                });
            }

            let command = chunk.command(address);
            tracing::debug!(
                "chunk {} @0x{:02X}: {} bytes",
                chunk.index,
                chunk.page_address,
                chunk.data.len()
            );
            if let Err(e) = link.transfer_raw(command.len(), 0, &command) {
                reporter.log(format!("Write error: {}", e));
                return Err(Error::transfer(chunk.index, chunk.offset, e));
            }

            written += chunk.data.len();
            if chunk.is_full {
                reporter.progress(ProgressState::ratio(written, total));
            } else {
                reporter.progress(100);
            }

            if !self.settle_time.is_zero() {
                std::thread::sleep(self.settle_time);
            }
        }
        Ok(())
    }

    /// 回读并比较 CRC，不一致时定位第一个不同的字节
    pub fn verify<T: RawTransfer + ?Sized>(
        &self,
        link: &mut T,
        address: DeviceAddress,
        expected: &[u8],
        reporter: &mut Reporter,
    ) -> Result<()> {
        reporter.log(format!("Verifying {} bytes", expected.len()));
        let rewind = [address.write_byte(), 0x00];
        link.transfer_raw(rewind.len(), 0, &rewind)?;
        let actual = link.transfer_raw(1, expected.len(), &[address.read_byte()])?;

        let expected_crc = Self::CRC.checksum(expected);
        let actual_crc = Self::CRC.checksum(&actual);
        if expected_crc == actual_crc {
            reporter.log(format!("Verify OK (CRC32 0x{:08X})", actual_crc));
            return Ok(());
        }
        tracing::debug!(
            "CRC32 mismatch: expected 0x{:08X}, got 0x{:08X}",
            expected_crc,
            actual_crc
        );

        let (offset, (&want, &got)) = expected
            .iter()
            .zip(actual.iter())
            .enumerate()
            .find(|(_, (a, b))| a != b)
            .ok_or_else(|| Error::protocol("verify read returned a short image"))?;
        Err(Error::VerifyMismatch {
            offset,
            expected: want,
            actual: got,
        })
    }
}
