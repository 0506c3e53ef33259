// Copyright The Rusted Firmware-A Contributors.
//
// SPDX-License-Identifier: BSD-3-Clause

//! Fixed-capacity pools of request descriptors and parameter slots.
//!
//! Neither pool ever grows or blocks: when it is exhausted the acquire fails with
//! [`OteError::OutOfMemory`] and the caller gives up on that call.

use crate::{
    error::OteError,
    protocol::{OperParam, PARAM_SLOTS, REQUEST_SLOTS, TeRequest},
};
use arrayvec::ArrayVec;
use core::ops::Range;

/// The number of request descriptors.
pub const REQUEST_COUNT: usize = 32;

const _: () = assert!(REQUEST_COUNT <= REQUEST_SLOTS);

const BITS_PER_WORD: usize = 64;
const BITMAP_WORDS: usize = PARAM_SLOTS.div_ceil(BITS_PER_WORD);

/// An in-flight call's claim on one request record of the request page.
///
/// Descriptors can't be cloned and are consumed when released, so a descriptor can't be released
/// twice.
#[derive(Debug, Eq, PartialEq)]
pub struct RequestDescriptor {
    slot: usize,
}

impl RequestDescriptor {
    /// Returns the index of the request record in the request page.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Returns the byte offset of the request record in the request page.
    pub fn offset(&self) -> u64 {
        (self.slot * size_of::<TeRequest>()) as u64
    }
}

/// The request descriptors, each either on the free list or on the used list.
pub struct RequestPool {
    free: ArrayVec<usize, REQUEST_COUNT>,
    used: ArrayVec<usize, REQUEST_COUNT>,
}

impl RequestPool {
    /// Creates a pool with all `REQUEST_COUNT` descriptors free.
    pub fn new() -> Self {
        Self {
            // Popping from the end hands out slot 0 first.
            free: (0..REQUEST_COUNT).rev().collect(),
            used: ArrayVec::new(),
        }
    }

    /// Takes a descriptor from the free list.
    pub fn acquire_descriptor(&mut self) -> Result<RequestDescriptor, OteError> {
        let slot = self.free.pop().ok_or(OteError::OutOfMemory)?;
        self.used.push(slot);
        Ok(RequestDescriptor { slot })
    }

    /// Returns a descriptor to the free list.
    pub fn release_descriptor(&mut self, descriptor: RequestDescriptor) {
        let position = self
            .used
            .iter()
            .position(|&slot| slot == descriptor.slot);
        // Descriptors only come from `acquire_descriptor` on this pool.
        debug_assert!(position.is_some());
        if let Some(position) = position {
            self.used.swap_remove(position);
            self.free.push(descriptor.slot);
        }
    }

    /// Returns the number of descriptors on the free list.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Returns the number of descriptors currently handed out.
    pub fn used_count(&self) -> usize {
        self.used.len()
    }
}

impl Default for RequestPool {
    fn default() -> Self {
        Self::new()
    }
}

/// A naturally aligned span of `2^order` parameter slots.
///
/// Like [`RequestDescriptor`], a block is consumed when released.
#[derive(Debug, Eq, PartialEq)]
pub struct ParamBlock {
    start: usize,
    order: u32,
}

impl ParamBlock {
    /// Returns the index of the first slot.
    pub fn start(&self) -> usize {
        self.start
    }

    /// Returns the number of slots in the block.
    pub fn len(&self) -> usize {
        1 << self.order
    }

    /// Returns the slot indices covered by the block.
    pub fn range(&self) -> Range<usize> {
        self.start..self.start + self.len()
    }

    /// Returns the byte offset of the block in the parameter page.
    pub fn offset(&self) -> u64 {
        (self.start * size_of::<OperParam>()) as u64
    }
}

/// Bitmap allocator handing out power-of-two blocks of the parameter page.
pub struct ParamAllocator {
    bitmap: [u64; BITMAP_WORDS],
}

impl ParamAllocator {
    /// Creates an allocator with every slot free.
    pub const fn new() -> Self {
        Self {
            bitmap: [0; BITMAP_WORDS],
        }
    }

    /// Allocates a block of the smallest power of two slots which is at least `count`.
    ///
    /// Blocks are aligned to their size, so a request can fail even when enough slots are free if
    /// they are scattered.
    pub fn acquire_param_block(&mut self, count: usize) -> Result<ParamBlock, OteError> {
        let size = count.next_power_of_two();
        if size > PARAM_SLOTS {
            return Err(OteError::OutOfMemory);
        }
        let start = (0..PARAM_SLOTS)
            .step_by(size)
            .find(|&start| (start..start + size).all(|slot| !self.is_used(slot)))
            .ok_or(OteError::OutOfMemory)?;
        for slot in start..start + size {
            self.set_used(slot, true);
        }
        Ok(ParamBlock {
            start,
            order: size.trailing_zeros(),
        })
    }

    /// Frees all the slots of the given block.
    pub fn release_param_block(&mut self, block: ParamBlock) {
        for slot in block.range() {
            debug_assert!(self.is_used(slot));
            self.set_used(slot, false);
        }
    }

    /// Returns the number of slots not covered by any block.
    pub fn free_slots(&self) -> usize {
        PARAM_SLOTS - self.bitmap.iter().map(|word| word.count_ones() as usize).sum::<usize>()
    }

    fn is_used(&self, slot: usize) -> bool {
        self.bitmap[slot / BITS_PER_WORD] & (1 << (slot % BITS_PER_WORD)) != 0
    }

    fn set_used(&mut self, slot: usize, used: bool) {
        let bit = 1 << (slot % BITS_PER_WORD);
        let word = &mut self.bitmap[slot / BITS_PER_WORD];
        if used {
            *word |= bit;
        } else {
            *word &= !bit;
        }
    }
}

impl Default for ParamAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MAX_PARAM_COUNT;

    #[test]
    fn descriptors_exhaust_at_capacity() {
        let mut pool = RequestPool::new();
        let mut held = Vec::new();

        for _ in 0..REQUEST_COUNT {
            held.push(pool.acquire_descriptor().unwrap());
        }
        assert_eq!(pool.free_count(), 0);
        assert_eq!(pool.used_count(), REQUEST_COUNT);
        assert_eq!(pool.acquire_descriptor(), Err(OteError::OutOfMemory));

        // All live descriptors refer to distinct slots.
        let mut slots = held.iter().map(RequestDescriptor::slot).collect::<Vec<_>>();
        slots.sort();
        slots.dedup();
        assert_eq!(slots.len(), REQUEST_COUNT);

        pool.release_descriptor(held.pop().unwrap());
        assert_eq!(pool.free_count(), 1);
        let again = pool.acquire_descriptor().unwrap();
        assert_eq!(pool.acquire_descriptor(), Err(OteError::OutOfMemory));

        pool.release_descriptor(again);
        for descriptor in held {
            pool.release_descriptor(descriptor);
        }
        assert_eq!(pool.free_count(), REQUEST_COUNT);
        assert_eq!(pool.used_count(), 0);
    }

    #[test]
    fn descriptor_offsets() {
        let mut pool = RequestPool::new();
        let first = pool.acquire_descriptor().unwrap();
        let second = pool.acquire_descriptor().unwrap();
        assert_eq!(first.slot(), 0);
        assert_eq!(first.offset(), 0);
        assert_eq!(second.offset(), 48);
    }

    #[test]
    fn block_size_is_next_power_of_two() {
        let mut allocator = ParamAllocator::new();
        for count in 0..=MAX_PARAM_COUNT {
            let block = allocator.acquire_param_block(count).unwrap();
            let expected = count.next_power_of_two();
            assert_eq!(block.len(), expected, "count {count}");
            assert!(block.len() >= count);
            assert_eq!(block.start() % block.len(), 0);
            allocator.release_param_block(block);
            assert_eq!(allocator.free_slots(), PARAM_SLOTS);
        }
    }

    #[test]
    fn released_block_can_be_reallocated() {
        let mut allocator = ParamAllocator::new();
        let mut blocks = Vec::new();
        while let Ok(block) = allocator.acquire_param_block(8) {
            blocks.push(block);
        }
        assert_eq!(blocks.len(), PARAM_SLOTS / 8);
        assert_eq!(allocator.free_slots(), 0);

        let released = blocks.swap_remove(3);
        let start = released.start();
        allocator.release_param_block(released);

        let block = allocator.acquire_param_block(5).unwrap();
        assert_eq!(block.start(), start);
        assert_eq!(block.len(), 8);
    }

    #[test]
    fn blocks_do_not_overlap() {
        let mut allocator = ParamAllocator::new();
        let a = allocator.acquire_param_block(3).unwrap();
        let b = allocator.acquire_param_block(1).unwrap();
        let c = allocator.acquire_param_block(2).unwrap();
        assert_eq!(a.range(), 0..4);
        assert_eq!(b.range(), 4..5);
        assert_eq!(c.range(), 6..8);
        assert_eq!(allocator.free_slots(), PARAM_SLOTS - 7);
    }

    #[test]
    fn fragmented_bitmap_fails() {
        let mut allocator = ParamAllocator::new();
        let mut blocks = Vec::new();
        for _ in 0..PARAM_SLOTS {
            blocks.push(allocator.acquire_param_block(1).unwrap());
        }
        // Free every other slot: half the page is free but no two free slots are adjacent.
        for block in blocks.into_iter().step_by(2) {
            allocator.release_param_block(block);
        }
        assert_eq!(allocator.free_slots(), PARAM_SLOTS / 2);
        assert!(allocator.acquire_param_block(1).is_ok());
        assert_eq!(allocator.acquire_param_block(2), Err(OteError::OutOfMemory));
    }

    #[test]
    fn oversized_request_fails() {
        let mut allocator = ParamAllocator::new();
        assert_eq!(
            allocator.acquire_param_block(PARAM_SLOTS + 1),
            Err(OteError::OutOfMemory)
        );
        assert_eq!(allocator.free_slots(), PARAM_SLOTS);
    }
}
