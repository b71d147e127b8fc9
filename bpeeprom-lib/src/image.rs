use crate::{Error, Result};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

/// In-memory EEPROM image, indexed by device offset.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteImage {
    data: Vec<u8>,
}

impl ByteImage {
    pub const ROW_WIDTH: usize = 16;

    /// Zero-filled image of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self { data: vec![0; len] }
    }

    pub fn from_bytes(data: impl Into<Vec<u8>>) -> Self {
        Self { data: data.into() }
    }

    /// Replaces the whole image.
    pub fn load(&mut self, data: &[u8]) {
        self.data.clear();
        self.data.extend_from_slice(data);
    }

    pub fn dump(&self) -> Vec<u8> {
        self.data.clone()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn get(&self, offset: usize) -> Option<u8> {
        self.data.get(offset).copied()
    }

    pub fn set(&mut self, offset: usize, value: u8) -> Result<()> {
        let len = self.data.len();
        let slot = self.data.get_mut(offset).ok_or_else(|| {
            Error::invalid_input(format!(
                "offset 0x{:04X} outside image of {} bytes",
                offset, len
            ))
        })?;
        *slot = value;
        Ok(())
    }

    pub fn fill(&mut self, value: u8) {
        self.data.fill(value);
    }

    /// Zeroes every byte, keeping the length.
    pub fn clear(&mut self) {
        self.fill(0x00);
    }

    /// Grows with 0xFF (erased EEPROM) or truncates.
    pub fn resize(&mut self, len: usize) {
        self.data.resize(len, 0xFF);
    }

    /// Loads a raw headerless binary file.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self::from_bytes(fs::read(path)?))
    }

    pub fn write_file(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, &self.data)?;
        Ok(())
    }

    /// Offset, hex and ASCII columns, sixteen bytes per row.
    pub fn hex_dump(&self) -> String {
        let mut out = String::new();
        for (row, bytes) in self.data.chunks(Self::ROW_WIDTH).enumerate() {
            let _ = write!(out, "{:04X}:", row * Self::ROW_WIDTH);
            for col in 0..Self::ROW_WIDTH {
                match bytes.get(col) {
                    Some(b) => {
                        let _ = write!(out, " {:02X}", b);
                    }
                    None => out.push_str("   "),
                }
            }
            out.push_str("  ");
            out.extend(bytes.iter().map(|&b| {
                if (0x20..=0x7E).contains(&b) {
                    b as char
                } else {
                    '.'
                }
            }));
            out.push('\n');
        }
        out
    }
}

impl From<Vec<u8>> for ByteImage {
    fn from(data: Vec<u8>) -> Self {
        Self { data }
    }
}
