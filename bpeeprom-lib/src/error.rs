use crate::JobKind;
use thiserror::Error;

/// Convenient result type for `bpeeprom-lib`.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serial(#[from] serialport::Error),

    #[error("integer parse error: {0}")]
    ParseInt(#[from] std::num::ParseIntError),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("transfer failed at chunk {chunk} (offset {offset:#06X}): {source}")]
    Transfer {
        chunk: usize,
        offset: usize,
        source: Box<Error>,
    },

    #[error("no valid port selected")]
    InvalidPort,

    #[error("cancelled after {chunks} chunk(s)")]
    Cancelled { chunks: usize },

    #[error("timeout while {0}")]
    Timeout(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("a {0} job is already running")]
    Busy(JobKind),

    #[error("verify failed at offset {offset:#06X}: expected {expected:#04X}, got {actual:#04X}")]
    VerifyMismatch { offset: usize, expected: u8, actual: u8 },
}

impl Error {
    pub fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Wraps a failed chunk exchange with its position in the payload.
    pub fn transfer(chunk: usize, offset: usize, source: Error) -> Self {
        Self::Transfer {
            chunk,
            offset,
            source: Box::new(source),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}
