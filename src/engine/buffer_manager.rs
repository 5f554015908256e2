//! Binds a task graph's logical buffer indices to the allocator's pool
//! slots for one running instance of that graph (one per active voice, or
//! the single FX-graph instance), and tracks each buffer's
//! `usages_remaining` so it can be returned to the pool the instant its
//! last consumer finishes with it (§4.3, §4.4).

use std::sync::atomic::{AtomicU32, Ordering};

use crate::buffer::Buffer;
use crate::engine::buffer_allocator::{BufferAllocator, BufferHandle};
use crate::graph::{BufferIndex, TaskGraph};
use crate::primitive::BufferPrimitive;

const UNASSIGNED: u32 = u32::MAX;

struct BufferSlot {
    primitive: BufferPrimitive,
    pool_index: AtomicU32,
    usages_remaining: AtomicU32,
    initial_usages: u32,
}

/// Per-buffer bookkeeping for one running instance (one voice, or the
/// singleton FX graph) of a task graph.
pub struct BufferManagerInstance {
    slots: Vec<BufferSlot>,
}

impl BufferManagerInstance {
    pub fn new(graph: &TaskGraph) -> Self {
        let slots = (0..graph.buffer_count())
            .map(|i| BufferSlot {
                primitive: graph.buffer_primitive(i),
                pool_index: AtomicU32::new(UNASSIGNED),
                usages_remaining: AtomicU32::new(0),
                initial_usages: graph.buffer_usages(i),
            })
            .collect();
        BufferManagerInstance { slots }
    }

    /// Reset every buffer to "not yet produced this chunk". Called once per
    /// chunk before the graph's initial tasks are submitted.
    pub fn begin_chunk(&self) {
        for slot in &self.slots {
            slot.pool_index.store(UNASSIGNED, Ordering::Relaxed);
            slot.usages_remaining.store(slot.initial_usages, Ordering::Relaxed);
        }
    }

    /// A producing task calls this to claim a fresh pool slot for its
    /// output buffer. Must be called exactly once per buffer per chunk.
    pub fn acquire_output<'a>(
        &self,
        buffer: BufferIndex,
        allocator: &'a BufferAllocator,
    ) -> &'a mut Buffer {
        let slot = &self.slots[buffer as usize];
        debug_assert_eq!(
            slot.pool_index.load(Ordering::Relaxed),
            UNASSIGNED,
            "buffer {buffer} produced twice in the same chunk"
        );
        let handle = allocator.allocate(slot.primitive);
        slot.pool_index.store(handle.index_for_manager(), Ordering::Release);
        // A buffer with zero in/inout references (e.g. a graph output with
        // no downstream task) is never released by `release`; the executor
        // reclaims it unconditionally at the end of the chunk instead.
        allocator.get_mut(handle)
    }

    fn handle(&self, buffer: BufferIndex) -> BufferHandle {
        let slot = &self.slots[buffer as usize];
        let index = slot.pool_index.load(Ordering::Acquire);
        debug_assert_ne!(index, UNASSIGNED, "buffer {buffer} read before it was produced");
        BufferHandle::from_manager(slot.primitive, index)
    }

    pub fn read<'a>(&self, buffer: BufferIndex, allocator: &'a BufferAllocator) -> &'a Buffer {
        allocator.get(self.handle(buffer))
    }

    pub fn read_mut<'a>(&self, buffer: BufferIndex, allocator: &'a BufferAllocator) -> &'a mut Buffer {
        allocator.get_mut(self.handle(buffer))
    }

    /// A consuming task calls this once per in/inout argument referencing
    /// `buffer` after it finishes reading it. Returns the buffer to the
    /// pool when this was the last outstanding consumer.
    pub fn release(&self, buffer: BufferIndex, allocator: &BufferAllocator) {
        let slot = &self.slots[buffer as usize];
        let prior = slot.usages_remaining.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(prior > 0, "buffer {buffer} released more times than it was used");
        if prior == 1 {
            allocator.free(self.handle(buffer));
            // Mirrors `release_unconditionally`: once freed, this slot must
            // read back as "not produced this chunk" rather than keep
            // pointing at a handle that may already be reallocated to a
            // different buffer, which would otherwise make a second
            // `release`/`release_unconditionally` call on the same slot
            // free that unrelated buffer out from under its new owner.
            slot.pool_index.store(UNASSIGNED, Ordering::Release);
        }
    }

    /// Force-release any buffer that was produced but never fully consumed
    /// (graph outputs and `remain_active`). Called once at the end of a
    /// chunk for each such buffer.
    pub fn release_unconditionally(&self, buffer: BufferIndex, allocator: &BufferAllocator) {
        let slot = &self.slots[buffer as usize];
        if slot.pool_index.load(Ordering::Acquire) != UNASSIGNED {
            allocator.free(self.handle(buffer));
            slot.pool_index.store(UNASSIGNED, Ordering::Release);
        }
    }
}
