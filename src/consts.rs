//! Compile-time configuration constants.
//!
//! These mirror the original C project's `config.h`: a handful of `#define`s
//! that fix the shape of every on-disk structure. Rust makes them `pub const`
//! instead of preprocessor macros, but the values and their meaning are
//! unchanged.

/// Size in bytes of every block on disk and every cached page in memory.
pub const BLOCK_SIZE: usize = 4096;

/// Maximum number of keys a B-tree node may hold before it must split.
pub const MAX_KEYS: usize = 4;

/// Minimum number of keys a non-root node must hold after any completed
/// operation. Always `MAX_KEYS / 2`.
pub const MIN_KEYS: usize = MAX_KEYS / 2;

/// Block number of the allocation bitmap. Always reserved, always in use.
pub const BITMAP_BLOCK: u64 = 0;

/// Block number of the superblock recording the current tree root.
pub const SUPERBLOCK_BLOCK: u64 = 1;

/// Owner id used for blocks that do not belong to a particular caller object
/// (the bitmap, the superblock, and every B-tree node).
pub const OWNER_NONE: u64 = 0;
