//! Fixed-size block device over a plain file.
//!
//! Grounded in the teacher's `BTreeFile`/`SmallFile` (`src/btree/file.rs`,
//! `src/io.rs`): a `RefCell<File>` wrapped in seek + read_exact/write_all,
//! rather than memory-mapping the image (mmap is an external collaborator,
//! out of scope for the core per the spec).

use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use log::debug;

use crate::consts::BLOCK_SIZE;
use crate::error::{Result, StoreError};

pub struct BlockDevice {
    file: RefCell<File>,
    total_blocks: u64,
}

impl BlockDevice {
    /// Opens an existing image file. Fails with `IOError` if the file is
    /// absent or its length is not a positive multiple of `BLOCK_SIZE`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        let len = file.metadata()?.len();
        if len == 0 || len % (BLOCK_SIZE as u64) != 0 {
            return Err(StoreError::IOError(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!(
                    "image length {} is not a positive multiple of block size {}",
                    len, BLOCK_SIZE
                ),
            )));
        }
        let total_blocks = len / (BLOCK_SIZE as u64);
        debug!("opened block device, total_blocks={}", total_blocks);
        Ok(Self {
            file: RefCell::new(file),
            total_blocks,
        })
    }

    /// Creates a fresh image of `total_blocks` zeroed blocks, truncating any
    /// existing file at `path`.
    pub fn create<P: AsRef<Path>>(path: P, total_blocks: u64) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        file.set_len(total_blocks * BLOCK_SIZE as u64)?;
        Ok(Self {
            file: RefCell::new(file),
            total_blocks,
        })
    }

    pub fn total_blocks(&self) -> u64 {
        self.total_blocks
    }

    fn check_range(&self, block_number: u64) -> Result<()> {
        if block_number >= self.total_blocks {
            return Err(StoreError::OutOfRange {
                block_number,
                total_blocks: self.total_blocks,
            });
        }
        Ok(())
    }

    pub fn read(&self, block_number: u64, out: &mut [u8; BLOCK_SIZE]) -> Result<()> {
        self.check_range(block_number)?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(block_number * BLOCK_SIZE as u64))?;
        file.read_exact(out)?;
        Ok(())
    }

    pub fn write(&self, block_number: u64, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        self.check_range(block_number)?;
        let mut file = self.file.borrow_mut();
        file.seek(SeekFrom::Start(block_number * BLOCK_SIZE as u64))?;
        file.write_all(data)?;
        Ok(())
    }

    /// Extends the image by `extra_blocks` zeroed blocks, returning the
    /// block number of the first new block.
    pub fn grow_by(&mut self, extra_blocks: u64) -> Result<u64> {
        let first_new = self.total_blocks;
        let new_len = (self.total_blocks + extra_blocks) * BLOCK_SIZE as u64;
        self.file.borrow().set_len(new_len)?;
        self.total_blocks += extra_blocks;
        Ok(first_new)
    }

    pub fn close(self) -> Result<()> {
        self.file.borrow().sync_all()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_then_open_round_trips_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.db");
        {
            let dev = BlockDevice::create(&path, 4).unwrap();
            assert_eq!(dev.total_blocks(), 4);
        }
        let dev = BlockDevice::open(&path).unwrap();
        assert_eq!(dev.total_blocks(), 4);
    }

    #[test]
    fn read_write_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.db");
        let dev = BlockDevice::create(&path, 2).unwrap();

        let mut page = [0u8; BLOCK_SIZE];
        page[0] = 0xab;
        page[BLOCK_SIZE - 1] = 0xcd;
        dev.write(1, &page).unwrap();

        let mut out = [0u8; BLOCK_SIZE];
        dev.read(1, &mut out).unwrap();
        assert_eq!(page, out);
    }

    #[test]
    fn out_of_range_read_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.db");
        let dev = BlockDevice::create(&path, 1).unwrap();
        let mut out = [0u8; BLOCK_SIZE];
        match dev.read(1, &mut out) {
            Err(StoreError::OutOfRange { .. }) => {}
            other => panic!("expected OutOfRange, got {:?}", other),
        }
    }

    #[test]
    fn bad_size_on_open_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.db");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        match BlockDevice::open(&path) {
            Err(StoreError::IOError(_)) => {}
            other => panic!("expected IOError, got {:?}", other),
        }
    }

    #[test]
    fn grow_by_extends_and_returns_first_new_block() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("image.db");
        let mut dev = BlockDevice::create(&path, 2).unwrap();
        let first = dev.grow_by(3).unwrap();
        assert_eq!(first, 2);
        assert_eq!(dev.total_blocks(), 5);
    }
}
