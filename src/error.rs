use std::fmt;
use std::io;

/// Error kinds produced by the storage core.
///
/// `NotFound` is rarely returned as an `Err` from the public API (lookups
/// represent absence as `Option::None`); it exists here mostly so internal
/// plumbing and the REPL can report it distinctly from other failures.
#[derive(Debug)]
pub enum StoreError {
    IOError(io::Error),
    OutOfRange { block_number: u64, total_blocks: u64 },
    NoSpace,
    CacheExhausted,
    NotFound,
    Corrupt(String),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            StoreError::IOError(e) => write!(f, "io error: {}", e),
            StoreError::OutOfRange {
                block_number,
                total_blocks,
            } => write!(
                f,
                "block {} out of range (total blocks: {})",
                block_number, total_blocks
            ),
            StoreError::NoSpace => write!(f, "no free block available"),
            StoreError::CacheExhausted => {
                write!(f, "buffer pool exhausted: every entry is pinned")
            }
            StoreError::NotFound => write!(f, "key not found"),
            StoreError::Corrupt(msg) => write!(f, "corrupt on-disk state: {}", msg),
        }
    }
}

impl std::error::Error for StoreError {
    fn description(&self) -> &str {
        "storage core error"
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::IOError(e)
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;
