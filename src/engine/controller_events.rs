//! Double-buffered controller event bucketing (§4.7).
//!
//! Each chunk, the driver's callback fills a flat event queue; this type
//! buckets it by parameter id so a task function can ask "what happened to
//! parameter P during this chunk" in O(1) plus O(events for P), without the
//! task function ever scanning the raw queue itself.
//!
//! Per the engine's zero-allocation-after-`initialize` rule, nothing here
//! allocates once `new` has returned: the raw queue, the sort scratch, and
//! the per-parameter state table are all sized once at construction (from
//! `queue_capacity`/`max_controller_parameters`) and only ever overwritten
//! in place afterward.

/// One controller value change, timestamped in fractional frames from the
/// start of the current chunk.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TimestampedControllerEvent {
    pub parameter_id: u32,
    pub frame_offset: f64,
    pub value: f32,
}

#[derive(Debug, Clone)]
struct ParameterState {
    previous_value: f32,
    next_previous_value: f32,
    current_events: Vec<TimestampedControllerEvent>,
}

impl ParameterState {
    fn new(queue_capacity: usize) -> Self {
        ParameterState {
            previous_value: 0.0,
            next_previous_value: 0.0,
            current_events: Vec::with_capacity(queue_capacity),
        }
    }
}

/// One entry of the fixed open-addressed parameter table. `occupied` tells
/// `find_slot` apart from a genuinely unseen id without needing a sentinel
/// parameter id.
struct Slot {
    occupied: bool,
    parameter_id: u32,
    state: ParameterState,
}

/// Tracks per-parameter event buckets across chunks. Each parameter's
/// bucket is rebuilt every chunk from the flat queue the driver fills, then
/// exposed as a sorted, contiguous slice for the duration of that chunk.
///
/// Backed by a fixed, linearly-probed slot table sized once from
/// `max_controller_parameters` at construction: touching a parameter for
/// the first time claims one of the pre-allocated slots rather than
/// inserting into a growable map, so bucketing a chunk's events never
/// allocates.
pub struct ControllerEventManager {
    max_parameters: u32,
    queue_capacity: usize,
    raw_queue: Vec<TimestampedControllerEvent>,
    /// Reused by `bucket` every chunk to sort the raw queue's valid prefix
    /// without allocating a fresh `Vec`.
    sort_scratch: Vec<TimestampedControllerEvent>,
    slots: Vec<Slot>,
}

impl ControllerEventManager {
    pub fn new(max_parameters: u32, queue_capacity: usize) -> Self {
        // Headroom over `max_parameters` keeps linear probing short even
        // when every declared parameter is in use. Table size is fixed for
        // the engine's lifetime either way.
        let table_size = ((max_parameters.max(1) as usize) * 2).next_power_of_two();
        ControllerEventManager {
            max_parameters,
            queue_capacity,
            raw_queue: vec![TimestampedControllerEvent::default(); queue_capacity],
            sort_scratch: Vec::with_capacity(queue_capacity),
            slots: (0..table_size)
                .map(|_| Slot { occupied: false, parameter_id: 0, state: ParameterState::new(queue_capacity) })
                .collect(),
        }
    }

    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }

    /// The flat scratch queue the driver callback fills for the upcoming
    /// chunk. Cleared and handed back empty every call.
    pub fn raw_queue_mut(&mut self) -> &mut Vec<TimestampedControllerEvent> {
        for event in &mut self.raw_queue {
            *event = TimestampedControllerEvent::default();
        }
        &mut self.raw_queue
    }

    /// Find `parameter_id`'s slot, claiming the first free one on its first
    /// touch. Linear probing over the fixed table below: never allocates,
    /// never grows.
    fn slot_index(&mut self, parameter_id: u32) -> usize {
        let cap = self.slots.len();
        let mut idx = parameter_id as usize % cap;
        for _ in 0..cap {
            if !self.slots[idx].occupied {
                self.slots[idx].occupied = true;
                self.slots[idx].parameter_id = parameter_id;
                return idx;
            }
            if self.slots[idx].parameter_id == parameter_id {
                return idx;
            }
            idx = (idx + 1) % cap;
        }
        panic!("controller parameter table exhausted: more distinct parameter ids in use than max_controller_parameters allows");
    }

    fn find_slot(&self, parameter_id: u32) -> Option<usize> {
        let cap = self.slots.len();
        let mut idx = parameter_id as usize % cap;
        for _ in 0..cap {
            if !self.slots[idx].occupied {
                return None;
            }
            if self.slots[idx].parameter_id == parameter_id {
                return Some(idx);
            }
            idx = (idx + 1) % cap;
        }
        None
    }

    /// Rebucket `event_count` valid entries from the raw queue by parameter
    /// id, advancing every known parameter's `previous_value` to what it
    /// was carrying out of the prior chunk.
    pub fn bucket(&mut self, event_count: usize) {
        for slot in &mut self.slots {
            if slot.occupied {
                slot.state.previous_value = slot.state.next_previous_value;
                slot.state.current_events.clear();
            }
        }

        self.sort_scratch.clear();
        self.sort_scratch.extend_from_slice(&self.raw_queue[..event_count.min(self.raw_queue.len())]);
        self.sort_scratch.sort_by(|a, b| a.frame_offset.partial_cmp(&b.frame_offset).unwrap());

        for i in 0..self.sort_scratch.len() {
            let event = self.sort_scratch[i];
            let idx = self.slot_index(event.parameter_id);
            let state = &mut self.slots[idx].state;
            state.next_previous_value = event.value;
            state.current_events.push(event);
        }
    }

    /// Register a parameter's initial value before the first chunk runs, so
    /// tasks reading it before any event arrives see a defined value rather
    /// than a default-constructed one.
    pub fn set_initial_value(&mut self, parameter_id: u32, value: f32) {
        let idx = self.slot_index(parameter_id);
        let state = &mut self.slots[idx].state;
        state.previous_value = value;
        state.next_previous_value = value;
    }

    /// The value a parameter held immediately before this chunk began.
    pub fn previous_value(&self, parameter_id: u32) -> f32 {
        self.find_slot(parameter_id).map(|i| self.slots[i].state.previous_value).unwrap_or(0.0)
    }

    /// This chunk's events for a parameter, in ascending timestamp order.
    pub fn events(&self, parameter_id: u32) -> &[TimestampedControllerEvent] {
        self.find_slot(parameter_id).map(|i| self.slots[i].state.current_events.as_slice()).unwrap_or(&[])
    }

    pub fn max_parameters(&self) -> u32 {
        self.max_parameters
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unseen_parameter_has_zero_previous_value() {
        let manager = ControllerEventManager::new(8, 16);
        assert_eq!(manager.previous_value(7), 0.0);
        assert_eq!(manager.events(7).len(), 0);
    }

    #[test]
    fn scenario_6_parameter_change_bucketing() {
        // Mirrors spec.md §8 Scenario 6: two events for parameter 7 in one
        // chunk, previous_value reflecting the settled value from before
        // this chunk, and next_previous_value taking effect afterward.
        let mut manager = ControllerEventManager::new(8, 16);

        {
            let queue = manager.raw_queue_mut();
            queue[0] = TimestampedControllerEvent { parameter_id: 7, frame_offset: 1.0, value: 0.25 };
            queue[1] = TimestampedControllerEvent { parameter_id: 7, frame_offset: 3.0, value: 0.75 };
        }
        manager.bucket(2);

        assert_eq!(manager.previous_value(7), 0.0, "never set before this chunk");
        assert_eq!(manager.events(7).len(), 2);
        assert_eq!(manager.events(7)[0].value, 0.25);
        assert_eq!(manager.events(7)[1].value, 0.75);

        // Next chunk: no new events, previous_value should now be 0.75.
        manager.bucket(0);
        assert_eq!(manager.previous_value(7), 0.75);
        assert_eq!(manager.events(7).len(), 0);
    }

    #[test]
    fn events_are_sorted_by_frame_offset_regardless_of_queue_order() {
        let mut manager = ControllerEventManager::new(8, 16);
        {
            let queue = manager.raw_queue_mut();
            queue[0] = TimestampedControllerEvent { parameter_id: 1, frame_offset: 5.0, value: 9.0 };
            queue[1] = TimestampedControllerEvent { parameter_id: 1, frame_offset: 2.0, value: 1.0 };
        }
        manager.bucket(2);
        let events = manager.events(1);
        assert_eq!(events[0].frame_offset, 2.0);
        assert_eq!(events[1].frame_offset, 5.0);
    }

    #[test]
    fn set_initial_value_seeds_previous_value_without_an_event() {
        let mut manager = ControllerEventManager::new(8, 16);
        manager.set_initial_value(3, 0.5);
        assert_eq!(manager.previous_value(3), 0.5);
        assert_eq!(manager.events(3).len(), 0);
    }

    /// Distinct parameter ids that collide into the same initial probe slot
    /// (table size is a power of two, so ids differing by a multiple of it
    /// collide) must still land in distinct slots and keep independent
    /// state.
    #[test]
    fn colliding_parameter_ids_probe_to_distinct_slots() {
        let mut manager = ControllerEventManager::new(4, 16);
        let table_size = manager.slots.len();
        let a = 1u32;
        let b = a + table_size as u32;

        manager.set_initial_value(a, 0.1);
        manager.set_initial_value(b, 0.2);

        assert_eq!(manager.previous_value(a), 0.1);
        assert_eq!(manager.previous_value(b), 0.2);
    }
}
