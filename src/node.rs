//! On-disk B-tree node layout: a single, standardized packed codec.
//!
//! Per REDESIGN FLAGS item 2, the teacher's two competing in-source node
//! representations (a copied-out struct vs. pointer-mutated bytes) are
//! collapsed into one: a plain `Node` struct that is always decoded in full
//! from a page before use and always re-encoded in full before the page is
//! handed back to the buffer pool. Field layout follows the original C
//! `BTreeNode` (`btr.h`) byte-for-byte, written with explicit
//! `to_le_bytes`/`from_le_bytes` calls rather than relying on native struct
//! padding, so the format does not depend on the host's layout rules.

use crate::consts::{BLOCK_SIZE, MAX_KEYS};
use crate::error::{Result, StoreError};

/// Optional one-byte tag written near the start of each block, matching the
/// source's declared-but-not-load-bearing `block_type_t`. Never consulted
/// for B-tree correctness; the buffer pool reads it only to decide whether a
/// block participates in per-owner dirty tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    Data,
    BtreeNode,
    Bitmap,
    Inode,
    Super,
}

impl BlockType {
    pub fn to_byte(self) -> u8 {
        match self {
            BlockType::Data => 0,
            BlockType::BtreeNode => 1,
            BlockType::Bitmap => 2,
            BlockType::Inode => 3,
            BlockType::Super => 4,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(BlockType::Data),
            1 => Some(BlockType::BtreeNode),
            2 => Some(BlockType::Bitmap),
            3 => Some(BlockType::Inode),
            4 => Some(BlockType::Super),
            _ => None,
        }
    }
}

/// Byte offset of the block-type tag. Placed immediately after the node
/// header rather than at byte 0, so it never collides with the self-address
/// check on `block_number`, which must be the leading field.
const TAG_OFFSET: usize = HEADER_SIZE;

const OFF_BLOCK_NUMBER: usize = 0;
const OFF_IS_LEAF: usize = 8;
const OFF_NUM_KEYS: usize = 9;
const OFF_KEYS: usize = 11;
const OFF_CHILDREN: usize = OFF_KEYS + 8 * MAX_KEYS;
const OFF_PARENT: usize = OFF_CHILDREN + 8 * (MAX_KEYS + 1);
const OFF_LEFT_SIBLING: usize = OFF_PARENT + 8;
const OFF_RIGHT_SIBLING: usize = OFF_LEFT_SIBLING + 8;
const HEADER_SIZE: usize = OFF_RIGHT_SIBLING + 8;

/// A single B-tree node, decoded in full from its backing page.
///
/// Leaves and internal nodes share this layout exactly (REDESIGN FLAGS item
/// 3): a leaf's `children[i]` holds the value associated with `keys[i]`
/// instead of a child block number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub block_number: u64,
    pub is_leaf: bool,
    pub num_keys: u16,
    pub keys: [u64; MAX_KEYS],
    pub children: [u64; MAX_KEYS + 1],
    pub parent: u64,
    pub left_sibling: u64,
    pub right_sibling: u64,
}

impl Node {
    pub fn new_leaf(block_number: u64) -> Self {
        Self {
            block_number,
            is_leaf: true,
            num_keys: 0,
            keys: [0; MAX_KEYS],
            children: [0; MAX_KEYS + 1],
            parent: 0,
            left_sibling: 0,
            right_sibling: 0,
        }
    }

    pub fn new_internal(block_number: u64) -> Self {
        Self {
            is_leaf: false,
            ..Self::new_leaf(block_number)
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent == 0
    }

    pub fn is_full(&self) -> bool {
        self.num_keys as usize >= MAX_KEYS
    }

    /// Decodes a node from a page, checking the self-address invariant.
    pub fn decode(block_number: u64, page: &[u8; BLOCK_SIZE]) -> Result<Self> {
        let stored_block_number = u64::from_le_bytes(
            page[OFF_BLOCK_NUMBER..OFF_BLOCK_NUMBER + 8]
                .try_into()
                .unwrap(),
        );
        if stored_block_number != block_number {
            return Err(StoreError::Corrupt(format!(
                "node self-address mismatch: block {} contains header for block {}",
                block_number, stored_block_number
            )));
        }

        let is_leaf = page[OFF_IS_LEAF] != 0;
        let num_keys = u16::from_le_bytes(page[OFF_NUM_KEYS..OFF_NUM_KEYS + 2].try_into().unwrap());
        if num_keys as usize > MAX_KEYS {
            return Err(StoreError::Corrupt(format!(
                "node at block {} reports num_keys={} > MAX_KEYS={}",
                block_number, num_keys, MAX_KEYS
            )));
        }

        let mut keys = [0u64; MAX_KEYS];
        for (i, slot) in keys.iter_mut().enumerate() {
            let off = OFF_KEYS + 8 * i;
            *slot = u64::from_le_bytes(page[off..off + 8].try_into().unwrap());
        }

        let mut children = [0u64; MAX_KEYS + 1];
        for (i, slot) in children.iter_mut().enumerate() {
            let off = OFF_CHILDREN + 8 * i;
            *slot = u64::from_le_bytes(page[off..off + 8].try_into().unwrap());
        }

        let parent = u64::from_le_bytes(page[OFF_PARENT..OFF_PARENT + 8].try_into().unwrap());
        let left_sibling =
            u64::from_le_bytes(page[OFF_LEFT_SIBLING..OFF_LEFT_SIBLING + 8].try_into().unwrap());
        let right_sibling = u64::from_le_bytes(
            page[OFF_RIGHT_SIBLING..OFF_RIGHT_SIBLING + 8]
                .try_into()
                .unwrap(),
        );

        Ok(Self {
            block_number,
            is_leaf,
            num_keys,
            keys,
            children,
            parent,
            left_sibling,
            right_sibling,
        })
    }

    /// Encodes the node into a page, zero-filling everything past the
    /// header, and stamps the optional block-type tag.
    pub fn encode(&self, page: &mut [u8; BLOCK_SIZE]) {
        page.iter_mut().for_each(|b| *b = 0);

        page[OFF_BLOCK_NUMBER..OFF_BLOCK_NUMBER + 8]
            .copy_from_slice(&self.block_number.to_le_bytes());
        page[OFF_IS_LEAF] = if self.is_leaf { 1 } else { 0 };
        page[OFF_NUM_KEYS..OFF_NUM_KEYS + 2].copy_from_slice(&self.num_keys.to_le_bytes());

        for (i, key) in self.keys.iter().enumerate() {
            let off = OFF_KEYS + 8 * i;
            page[off..off + 8].copy_from_slice(&key.to_le_bytes());
        }
        for (i, child) in self.children.iter().enumerate() {
            let off = OFF_CHILDREN + 8 * i;
            page[off..off + 8].copy_from_slice(&child.to_le_bytes());
        }

        page[OFF_PARENT..OFF_PARENT + 8].copy_from_slice(&self.parent.to_le_bytes());
        page[OFF_LEFT_SIBLING..OFF_LEFT_SIBLING + 8]
            .copy_from_slice(&self.left_sibling.to_le_bytes());
        page[OFF_RIGHT_SIBLING..OFF_RIGHT_SIBLING + 8]
            .copy_from_slice(&self.right_sibling.to_le_bytes());

        page[TAG_OFFSET] = BlockType::BtreeNode.to_byte();
    }
}
