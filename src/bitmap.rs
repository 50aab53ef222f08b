//! The block-0 allocation bitmap.
//!
//! One bit per block; bit `i` set means block `i` is in use. Bit 0 (the
//! bitmap's own block) is always set. Grounded in the original C
//! `bitmap.c`/`bitmap.h` (`bitmap_get`/`bitmap_put` over 64-bit words),
//! expressed with the `bit-vec` crate the way the teacher's leaf pages
//! (`src/btree/page.rs`) encode their slot-occupancy header instead of by
//! hand-rolled word/shift arithmetic.

use bit_vec::BitVec;
use log::debug;

use crate::consts::BLOCK_SIZE;
use crate::error::{Result, StoreError};

/// Decoded view of the bitmap block. Produced from and flattened back into
/// a raw `BLOCK_SIZE` page by the buffer pool, exactly like a B-tree node.
pub struct Bitmap {
    bits: BitVec<u32>,
}

impl Bitmap {
    /// A freshly formatted bitmap for an image of `total_blocks` blocks,
    /// with bit 0 (the bitmap's own block) already marked in-use.
    pub fn new(total_blocks: u64) -> Self {
        let mut bits = BitVec::from_elem(total_blocks as usize, false);
        bits.set(0, true);
        Self { bits }
    }

    pub fn decode(page: &[u8; BLOCK_SIZE], total_blocks: u64) -> Self {
        let byte_len = ((total_blocks as usize) + 7) / 8;
        let bytes = page[..byte_len].to_vec();
        let mut bits = BitVec::from_bytes(&bytes);
        bits.truncate(total_blocks as usize);
        Self { bits }
    }

    pub fn encode(&self, page: &mut [u8; BLOCK_SIZE]) {
        page.iter_mut().for_each(|b| *b = 0);
        let bytes = self.bits.to_bytes();
        page[..bytes.len()].copy_from_slice(&bytes);
    }

    pub fn is_set(&self, block_number: u64) -> bool {
        self.bits.get(block_number as usize).unwrap_or(false)
    }

    /// Scans bits in ascending order and returns + sets the first clear bit.
    pub fn alloc(&mut self) -> Result<u64> {
        for i in 0..self.bits.len() {
            if !self.bits.get(i).unwrap() {
                self.bits.set(i, true);
                debug!("allocated block {}", i);
                return Ok(i as u64);
            }
        }
        Err(StoreError::NoSpace)
    }

    /// Clears bit `b`; a no-op if already clear.
    pub fn free(&mut self, block_number: u64) {
        if (block_number as usize) < self.bits.len() {
            self.bits.set(block_number as usize, false);
            debug!("freed block {}", block_number);
        }
    }

    /// Extends the bitmap to track `new_total_blocks`, leaving the new bits
    /// clear. Fails if the larger bitmap would no longer fit in a single
    /// `BLOCK_SIZE` page (`BLOCK_SIZE * 8` blocks), since the bitmap is
    /// itself stored as exactly one block.
    pub fn grow(&mut self, new_total_blocks: u64) -> Result<()> {
        if new_total_blocks as usize > BLOCK_SIZE * 8 {
            return Err(StoreError::NoSpace);
        }
        let additional = new_total_blocks as usize - self.bits.len();
        self.bits.grow(additional, false);
        Ok(())
    }
}
