//! The per-task scratch-memory arena (§4.6): one contiguous, zero-
//! initialized, 64-byte-aligned block, sliced once at `initialize` time and
//! never resized or reallocated on the hot path.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

const ARENA_ALIGNMENT: usize = 64;

/// Describes how much scratch memory a single task instance needs, and how
/// many instances of it exist (one per voice, for a voice-graph task; one,
/// for an FX-graph task).
#[derive(Debug, Clone, Copy)]
pub struct TaskMemoryRequest {
    pub task_index: u32,
    pub bytes_per_instance: usize,
    pub instance_count: u32,
}

struct Slice {
    offset: usize,
    bytes_per_instance: usize,
}

/// A single zero-initialized, 64-byte-aligned arena holding every task's
/// scratch memory contiguously. `slice(task, voice)` hands out a disjoint
/// `&mut [u8]` into it; since the executor only ever runs one instance of a
/// given task for a given voice at a time, these slices never alias a live
/// borrow.
pub struct TaskMemoryArena {
    ptr: NonNull<u8>,
    layout: Layout,
    slices: Vec<Slice>,
}

unsafe impl Send for TaskMemoryArena {}
unsafe impl Sync for TaskMemoryArena {}

impl TaskMemoryArena {
    pub fn new(requests: &[TaskMemoryRequest]) -> Result<Self, usize> {
        let mut slices = vec![
            Slice { offset: 0, bytes_per_instance: 0 };
            requests.iter().map(|r| r.task_index).max().map(|m| m as usize + 1).unwrap_or(0)
        ];

        let mut total = 0usize;
        for request in requests {
            let aligned_per_instance = align_up(request.bytes_per_instance, ARENA_ALIGNMENT);
            slices[request.task_index as usize] =
                Slice { offset: total, bytes_per_instance: aligned_per_instance };
            total += aligned_per_instance * request.instance_count.max(1) as usize;
        }
        total = total.max(ARENA_ALIGNMENT);

        let layout = Layout::from_size_align(total, ARENA_ALIGNMENT)
            .map_err(|_| total)?;
        // SAFETY: `layout` has non-zero size, since `total` was just raised
        // to at least `ARENA_ALIGNMENT`.
        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(total)?;

        Ok(TaskMemoryArena { ptr, layout, slices })
    }

    /// The scratch-memory slice for one instance of `task` (`voice_index`
    /// is `0` for FX-graph tasks, which have exactly one instance).
    ///
    /// # Safety
    /// The caller must not hold two live slices for the same
    /// `(task, voice_index)` pair at once; the executor's predecessor/
    /// successor scheduling guarantees this by construction.
    #[allow(clippy::mut_from_ref)]
    pub fn slice(&self, task: u32, voice_index: u32) -> &mut [u8] {
        let slot = &self.slices[task as usize];
        let start = slot.offset + slot.bytes_per_instance * voice_index as usize;
        debug_assert!(start + slot.bytes_per_instance <= self.layout.size());
        // SAFETY: `start..start+len` stays within the allocation sized
        // above, and per-instance slices never overlap by construction.
        unsafe {
            std::slice::from_raw_parts_mut(self.ptr.as_ptr().add(start), slot.bytes_per_instance)
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for TaskMemoryArena {
    fn drop(&mut self) {
        // SAFETY: `self.ptr`/`self.layout` are exactly what `alloc_zeroed`
        // was called with, and this runs at most once.
        unsafe {
            dealloc(self.ptr.as_ptr(), self.layout);
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    (value + alignment - 1) & !(alignment - 1)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn slices_for_distinct_tasks_and_voices_never_overlap() {
        let arena = TaskMemoryArena::new(&[
            TaskMemoryRequest { task_index: 0, bytes_per_instance: 10, instance_count: 2 },
            TaskMemoryRequest { task_index: 2, bytes_per_instance: 3, instance_count: 1 },
        ])
        .unwrap();

        let mut seen_ranges = Vec::new();
        for (task, instances) in [(0u32, 2u32), (2, 1)] {
            for voice in 0..instances {
                let slice = arena.slice(task, voice);
                let start = slice.as_ptr() as usize;
                let end = start + slice.len();
                for &(s, e) in &seen_ranges {
                    assert!(end <= s || start >= e, "overlapping scratch slices");
                }
                seen_ranges.push((start, end));
            }
        }
    }

    #[test]
    fn arena_memory_starts_zeroed() {
        let arena = TaskMemoryArena::new(&[TaskMemoryRequest {
            task_index: 0,
            bytes_per_instance: 8,
            instance_count: 1,
        }])
        .unwrap();
        assert!(arena.slice(0, 0).iter().all(|&b| b == 0));
    }

    #[test]
    fn empty_request_list_still_produces_a_valid_arena() {
        let arena = TaskMemoryArena::new(&[]).unwrap();
        assert!(arena.total_bytes() >= ARENA_ALIGNMENT);
    }
}
