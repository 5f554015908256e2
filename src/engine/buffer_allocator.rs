//! O(1), lock-free allocation/free of fixed-size, SIMD-aligned audio
//! buffers, one free list per primitive type (§4.3).

use std::collections::HashMap;

use crossbeam_queue::ArrayQueue;

use crate::buffer::Buffer;
use crate::primitive::BufferPrimitive;

/// A handle into one of the allocator's per-primitive pools. Opaque to
/// callers; only meaningful when passed back to the same allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferHandle {
    primitive: BufferPrimitive,
    index: u32,
}

impl BufferHandle {
    pub fn primitive(&self) -> BufferPrimitive {
        self.primitive
    }

    /// Used by the buffer manager to store/restore a handle's pool index in
    /// an `AtomicU32` alongside the buffer's already-known primitive type.
    pub(crate) fn index_for_manager(&self) -> u32 {
        self.index
    }

    pub(crate) fn from_manager(primitive: BufferPrimitive, index: u32) -> Self {
        BufferHandle { primitive, index }
    }
}

/// Describes how many buffers of a given primitive type must be available
/// simultaneously; sized by the buffer manager from task-graph metadata.
#[derive(Debug, Clone, Copy)]
pub struct PoolSizeRequest {
    pub primitive: BufferPrimitive,
    pub buffer_size: usize,
    pub buffer_count: u32,
}

struct Pool {
    // Owned storage for every slot in this pool. Indexing is stable for the
    // life of the allocator; `UnsafeCell` gives interior mutability because
    // multiple threads hold `BufferHandle`s into the same backing store.
    slots: Box<[std::cell::UnsafeCell<Buffer>]>,
    free: ArrayQueue<u32>,
}

// SAFETY: access to a given slot is only ever live through one task at a
// time, which is guaranteed by the task graph's predecessor/successor
// edges (see the buffer manager), not by any locking in this type.
unsafe impl Sync for Pool {}

pub struct BufferAllocator {
    pools: HashMap<BufferPrimitive, Pool>,
}

impl BufferAllocator {
    /// Allocate the backing store for every requested pool. Called once at
    /// `initialize`; never again on the hot path.
    pub fn new(requests: &[PoolSizeRequest]) -> Self {
        let mut pools = HashMap::new();
        for request in requests {
            let slots: Box<[std::cell::UnsafeCell<Buffer>]> = (0..request.buffer_count)
                .map(|_| std::cell::UnsafeCell::new(Buffer::new(request.primitive, request.buffer_size)))
                .collect();
            let free = ArrayQueue::new(request.buffer_count.max(1) as usize);
            for i in 0..request.buffer_count {
                // Queue was just sized to fit exactly `buffer_count` entries.
                free.push(i).ok();
            }
            pools.insert(request.primitive, Pool { slots, free });
        }
        BufferAllocator { pools }
    }

    /// Non-blocking, non-allocating pop from the relevant pool's free list.
    /// Asserts if the pool is empty: the buffer manager is responsible for
    /// sizing pools as an upper bound on concurrent live buffers.
    pub fn allocate(&self, primitive: BufferPrimitive) -> BufferHandle {
        let pool = self.pools.get(&primitive).expect("no pool for primitive type");
        let index = pool
            .free
            .pop()
            .expect("buffer pool exhausted: graph concurrency bound was violated");
        BufferHandle { primitive, index }
    }

    pub fn free(&self, handle: BufferHandle) {
        let pool = self.pools.get(&handle.primitive).expect("no pool for primitive type");
        pool.free.push(handle.index).expect("buffer pool free-list overflow: double free?");
    }

    pub fn get(&self, handle: BufferHandle) -> &Buffer {
        let pool = self.pools.get(&handle.primitive).expect("no pool for primitive type");
        // SAFETY: the caller holds a live handle, meaning it was popped from
        // `free` and not yet returned; no other holder can exist for it
        // simultaneously by the same invariant.
        unsafe { &*pool.slots[handle.index as usize].get() }
    }

    #[allow(clippy::mut_from_ref)]
    pub fn get_mut(&self, handle: BufferHandle) -> &mut Buffer {
        let pool = self.pools.get(&handle.primitive).expect("no pool for primitive type");
        // SAFETY: see `get`; exclusive access follows from holding the
        // handle, which the buffer manager only ever hands to one task.
        unsafe { &mut *pool.slots[handle.index as usize].get() }
    }

    /// Number of buffers currently available in a pool; used by tests to
    /// assert that every buffer was returned by the end of a chunk.
    pub fn free_count(&self, primitive: BufferPrimitive) -> usize {
        self.pools.get(&primitive).map(|p| p.free.len()).unwrap_or(0)
    }

    pub fn pool_capacity(&self, primitive: BufferPrimitive) -> usize {
        self.pools.get(&primitive).map(|p| p.slots.len()).unwrap_or(0)
    }
}
