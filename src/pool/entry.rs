//! Cache entry storage and the RAII pin guard.
//!
//! The original C `cache_entry_t` (`cache.h`/`types.h`) declares a
//! `pin_count` field that the reference implementation never actually
//! increments or decrements. Per the spec's Open Question resolution, this
//! crate makes `pin_count` real: every `PageGuard` increments it on
//! construction and decrements it on `Drop`, so eviction never races a live
//! borrow and release is deterministic on every exit path, including `?`.

use crate::consts::BLOCK_SIZE;
use crate::node::BlockType;

/// One resident page plus its pool bookkeeping.
///
/// `pin_count` deliberately does NOT live here: it is tracked in a parallel
/// array in `pool::PoolState`. Keeping it out of the `RefCell` that guards
/// the page bytes means a live `PageGuard` (which holds that `RefCell`
/// borrowed) never blocks another call from merely checking whether this
/// slot is pinned, which eviction must be able to do while other slots are
/// pinned.
pub(crate) struct CacheEntry {
    pub dirty: bool,
    pub block_number: u64,
    pub owner_id: u64,
    pub block_type: BlockType,
    pub page: Box<[u8; BLOCK_SIZE]>,
}

impl CacheEntry {
    pub fn new(block_number: u64, owner_id: u64, block_type: BlockType, page: Box<[u8; BLOCK_SIZE]>) -> Self {
        Self {
            dirty: false,
            block_number,
            owner_id,
            block_type,
            page,
        }
    }
}
