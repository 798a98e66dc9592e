use std::fmt;
use std::io;
use thiserror::Error;

/// Which end of the pipe an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Reader,
    Writer,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Reader => f.write_str("reader"),
            Side::Writer => f.write_str("writer"),
        }
    }
}

#[derive(Error, Debug)]
pub enum SpscError {
    /// The operation cannot make progress without blocking.
    #[error("operation would block")]
    WouldBlock,

    /// This endpoint has already closed its own side.
    #[error("endpoint is closed")]
    Closed,

    /// The reader is gone; nothing written can ever be consumed.
    #[error("broken pipe: reader end is closed")]
    BrokenPipe,

    #[error("invalid argument: {0}")]
    Argument(String),

    #[error("region of {size} bytes is too small (need at least {min})")]
    Size { size: usize, min: usize },

    #[error("capacity {capacity} exceeds the maximum of {max}")]
    CapacityTooLarge { capacity: usize, max: usize },

    #[error("close: {0} is already closed")]
    AlreadyClosed(Side),

    #[error("gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Semaphore error: {0}")]
    Semaphore(String),

    #[error("not implemented")]
    Unimplemented,

    #[error("unspecified error")]
    Unspecified,
}

impl SpscError {
    /// Only `WouldBlock` may succeed when retried unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SpscError::WouldBlock)
    }

    /// Conditions of the pipe itself, as opposed to caller bugs or setup failures.
    pub fn is_channel_condition(&self) -> bool {
        matches!(
            self,
            SpscError::WouldBlock | SpscError::Closed | SpscError::BrokenPipe
        )
    }
}

pub type Result<T> = std::result::Result<T, SpscError>;
