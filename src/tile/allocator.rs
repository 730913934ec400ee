//! Fixed-size coefficient block pools.
//!
//! Every LL and H coefficient buffer in the engine has one of two sizes, so
//! buffers are recycled through two pools instead of going back to the
//! system allocator. When the free list runs dry a pool allocates a batch of
//! blocks, each its own boxed buffer, and never shrinks; released blocks go on
//! a free list and are handed out again.
//!
//! Pools are shared by all worker threads and take their own lock.

use std::ops::{Deref, DerefMut};

use parking_lot::Mutex;
use tracing::warn;

use crate::codec::Coeff;
use crate::error::AllocError;

/// Default number of blocks allocated together when a pool grows.
pub const DEFAULT_BLOCKS_PER_BATCH: usize = 64;

/// A coefficient buffer owned by the holder until released to its pool.
#[derive(Debug)]
pub struct CoeffBlock {
    data: Box<[Coeff]>,
}

impl CoeffBlock {
    fn new(len: usize) -> Self {
        Self {
            data: vec![0; len].into_boxed_slice(),
        }
    }
}

impl Deref for CoeffBlock {
    type Target = [Coeff];

    fn deref(&self) -> &[Coeff] {
        &self.data
    }
}

impl DerefMut for CoeffBlock {
    fn deref_mut(&mut self) -> &mut [Coeff] {
        &mut self.data
    }
}

#[derive(Debug, Default)]
struct PoolState {
    free: Vec<CoeffBlock>,
    allocated: usize,
    outstanding: usize,
}

/// Thread-safe pool of equally sized coefficient blocks.
#[derive(Debug)]
pub struct BlockAllocator {
    name: &'static str,
    block_len: usize,
    blocks_per_batch: usize,
    max_blocks: Option<usize>,
    state: Mutex<PoolState>,
}

impl BlockAllocator {
    /// Create a pool of blocks holding `block_len` coefficients each.
    ///
    /// # Arguments
    /// * `name` - Pool name used in logs and errors
    /// * `block_len` - Coefficients per block
    /// * `blocks_per_batch` - Blocks allocated at once when the free list is empty
    /// * `max_blocks` - Optional cap on the total number of blocks
    pub fn new(
        name: &'static str,
        block_len: usize,
        blocks_per_batch: usize,
        max_blocks: Option<usize>,
    ) -> Self {
        Self {
            name,
            block_len,
            blocks_per_batch: blocks_per_batch.max(1),
            max_blocks,
            state: Mutex::new(PoolState::default()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Coefficients per block.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    /// Take a block from the pool.
    ///
    /// Block contents are unspecified; callers overwrite the whole block.
    pub fn acquire(&self) -> Result<CoeffBlock, AllocError> {
        let mut state = self.state.lock();
        if state.free.is_empty() {
            self.grow(&mut state)?;
        }
        let block = state.free.pop().ok_or(AllocError::PoolExhausted {
            pool: self.name,
            capacity: self.max_blocks.unwrap_or(state.allocated),
        })?;
        state.outstanding += 1;
        Ok(block)
    }

    /// Return a block to the pool.
    pub fn release(&self, block: CoeffBlock) {
        if block.len() != self.block_len {
            warn!(
                pool = self.name,
                expected = self.block_len,
                actual = block.len(),
                "Dropping coefficient block released to the wrong pool"
            );
            return;
        }
        let mut state = self.state.lock();
        state.outstanding = state.outstanding.saturating_sub(1);
        state.free.push(block);
    }

    /// Blocks currently held outside the pool.
    pub fn outstanding(&self) -> usize {
        self.state.lock().outstanding
    }

    /// Blocks sitting on the free list.
    pub fn free(&self) -> usize {
        self.state.lock().free.len()
    }

    /// Blocks created over the pool's lifetime.
    pub fn allocated(&self) -> usize {
        self.state.lock().allocated
    }

    fn grow(&self, state: &mut PoolState) -> Result<(), AllocError> {
        let mut count = self.blocks_per_batch;
        if let Some(max) = self.max_blocks {
            count = count.min(max.saturating_sub(state.allocated));
            if count == 0 {
                return Err(AllocError::PoolExhausted {
                    pool: self.name,
                    capacity: max,
                });
            }
        }
        state.free.reserve(count);
        for _ in 0..count {
            state.free.push(CoeffBlock::new(self.block_len));
        }
        state.allocated += count;
        Ok(())
    }
}
