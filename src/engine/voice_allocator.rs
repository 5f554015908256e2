//! Polyphonic voice-slot assignment and stealing (§4.8), grounded on the
//! voice-stealing logic `timstr-flosion-rs` uses for its keyed sound
//! inputs, generalized to a fixed-size slot table with mid-chunk offsets.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Free,
    Active,
    /// Releasing but still producing sound until the task graph's
    /// `remain_active` output goes false.
    Releasing,
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    state: VoiceState,
    note_id: u64,
    note_velocity: f32,
    /// Offset, in frames from the start of the current chunk, at which this
    /// voice's note-on occurred. `0` once the voice has run a full chunk.
    chunk_offset_samples: u32,
    /// Frame within the current chunk at which a note-off was received, if
    /// any; task functions can use it to shape an in-chunk release.
    note_release_sample: Option<u32>,
    /// Monotonically increasing; used to find the oldest active voice when
    /// stealing is required.
    activation_order: u64,
    /// Set by `note_on`, consumed by the executor's `process_stage` (§4.1.2
    /// step 1: fire every task's `voice_initializer` the one chunk a voice
    /// activates), then cleared by the next `begin_chunk`.
    activated_this_chunk: bool,
}

/// Assigns logical note-ids to voice-graph instance slots `0..max_voices`,
/// stealing the oldest active voice when every slot is full.
pub struct VoiceAllocator {
    voices: Vec<Voice>,
    next_activation_order: u64,
}

impl VoiceAllocator {
    pub fn new(max_voices: u32) -> Self {
        VoiceAllocator {
            voices: vec![
                Voice {
                    state: VoiceState::Free,
                    note_id: 0,
                    note_velocity: 0.0,
                    chunk_offset_samples: 0,
                    note_release_sample: None,
                    activation_order: 0,
                    activated_this_chunk: false,
                };
                max_voices.max(1) as usize
            ],
            next_activation_order: 0,
        }
    }

    pub fn max_voices(&self) -> u32 {
        self.voices.len() as u32
    }

    /// Begin a new chunk: clear every voice's transient per-chunk state.
    pub fn begin_chunk(&mut self) {
        for voice in &mut self.voices {
            voice.chunk_offset_samples = 0;
            voice.note_release_sample = None;
            voice.activated_this_chunk = false;
        }
    }

    /// Assign a voice slot to `note_id`, starting mid-chunk at
    /// `offset_samples`. Steals the oldest active or releasing voice if
    /// every slot is occupied; returns the slot index either way.
    pub fn note_on(&mut self, note_id: u64, velocity: f32, offset_samples: u32) -> u32 {
        let order = self.next_activation_order;
        self.next_activation_order += 1;

        let free_slot = self.voices.iter().position(|v| v.state == VoiceState::Free);
        let slot = free_slot.unwrap_or_else(|| self.oldest_voice_index());

        self.voices[slot] = Voice {
            state: VoiceState::Active,
            note_id,
            note_velocity: velocity,
            chunk_offset_samples: offset_samples,
            note_release_sample: None,
            activation_order: order,
            activated_this_chunk: true,
        };
        slot as u32
    }

    /// Mark the voice holding `note_id` as releasing, starting at
    /// `release_sample` within the current chunk. A no-op if the note was
    /// already stolen or has no active voice.
    pub fn note_off(&mut self, note_id: u64, release_sample: u32) {
        if let Some(voice) = self.voices.iter_mut().find(|v| v.state == VoiceState::Active && v.note_id == note_id) {
            voice.state = VoiceState::Releasing;
            voice.note_release_sample = Some(release_sample);
        }
    }

    /// The executor calls this once a voice's task graph reports
    /// `remain_active == false`, freeing its slot for reuse.
    pub fn deactivate(&mut self, voice_index: u32) {
        self.voices[voice_index as usize].state = VoiceState::Free;
    }

    pub fn state(&self, voice_index: u32) -> VoiceState {
        self.voices[voice_index as usize].state
    }

    pub fn chunk_offset_samples(&self, voice_index: u32) -> u32 {
        self.voices[voice_index as usize].chunk_offset_samples
    }

    pub fn note_release_sample(&self, voice_index: u32) -> Option<u32> {
        self.voices[voice_index as usize].note_release_sample
    }

    pub fn note_id(&self, voice_index: u32) -> u64 {
        self.voices[voice_index as usize].note_id
    }

    pub fn note_velocity(&self, voice_index: u32) -> f32 {
        self.voices[voice_index as usize].note_velocity
    }

    /// Whether this voice's `note_on` landed during the chunk currently
    /// being processed; the executor uses this to decide whether to fire
    /// the voice graph's `voice_initializer` callbacks this chunk.
    pub fn activated_this_chunk(&self, voice_index: u32) -> bool {
        self.voices[voice_index as usize].activated_this_chunk
    }

    /// Every slot currently producing sound (active or releasing); this is
    /// the set the executor dispatches the voice graph across this chunk.
    pub fn active_voices(&self) -> impl Iterator<Item = u32> + '_ {
        self.voices
            .iter()
            .enumerate()
            .filter(|(_, v)| v.state != VoiceState::Free)
            .map(|(i, _)| i as u32)
    }

    fn oldest_voice_index(&self) -> usize {
        self.voices
            .iter()
            .enumerate()
            .min_by_key(|(_, v)| v.activation_order)
            .map(|(i, _)| i)
            .expect("voice allocator has at least one slot")
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn note_on_fills_free_slots_before_stealing() {
        let mut allocator = VoiceAllocator::new(2);
        let a = allocator.note_on(1, 0.8, 0);
        let b = allocator.note_on(2, 0.9, 0);
        assert_ne!(a, b);
        assert_eq!(allocator.active_voices().count(), 2);
        assert_eq!(allocator.note_velocity(a), 0.8);
        assert_eq!(allocator.note_velocity(b), 0.9);
    }

    #[test]
    fn note_on_steals_oldest_when_full() {
        let mut allocator = VoiceAllocator::new(1);
        let first = allocator.note_on(1, 1.0, 0);
        let second = allocator.note_on(2, 1.0, 0);
        assert_eq!(first, second, "single-slot pool must steal the only voice");
        assert_eq!(allocator.note_id(second), 2);
    }

    #[test]
    fn note_off_marks_releasing_not_free() {
        let mut allocator = VoiceAllocator::new(1);
        let slot = allocator.note_on(1, 1.0, 0);
        allocator.note_off(1, 4);
        assert_eq!(allocator.state(slot), VoiceState::Releasing);
        assert_eq!(allocator.note_release_sample(slot), Some(4));
        assert_eq!(allocator.active_voices().count(), 1);
    }

    #[test]
    fn deactivate_frees_the_slot() {
        let mut allocator = VoiceAllocator::new(1);
        let slot = allocator.note_on(1, 1.0, 0);
        allocator.deactivate(slot);
        assert_eq!(allocator.state(slot), VoiceState::Free);
        assert_eq!(allocator.active_voices().count(), 0);
    }

    #[test]
    fn begin_chunk_clears_transient_offsets() {
        let mut allocator = VoiceAllocator::new(1);
        let slot = allocator.note_on(1, 1.0, 4);
        allocator.note_off(1, 6);
        allocator.begin_chunk();
        assert_eq!(allocator.chunk_offset_samples(slot), 0);
        assert_eq!(allocator.note_release_sample(slot), None);
        assert_eq!(allocator.state(slot), VoiceState::Releasing, "chunk boundary doesn't reset state");
    }

    /// Fuzz a random stream of note-on/note-off/begin_chunk calls against a
    /// fixed voice count and assert the allocator never hands back a slot
    /// index outside its own range and never reports more active voices
    /// than it has slots for, however the random note stream lands.
    #[test]
    fn random_note_streams_never_violate_slot_bounds() {
        use rand::{Rng, SeedableRng};
        use rand::rngs::StdRng;

        let mut rng = StdRng::seed_from_u64(0xDEAD_u64.wrapping_mul(0x9E3779B97F4A7C15));
        for max_voices in [1u32, 2, 4] {
            let mut allocator = VoiceAllocator::new(max_voices);
            let mut held_notes: Vec<u64> = Vec::new();

            for _ in 0..500 {
                match rng.gen_range(0..3) {
                    0 => {
                        let note_id = rng.gen_range(0..8u64);
                        let velocity = rng.gen_range(0.0f32..1.0);
                        let offset = rng.gen_range(0..64u32);
                        let slot = allocator.note_on(note_id, velocity, offset);
                        assert!(slot < max_voices, "slot {slot} out of bounds for {max_voices} voices");
                        held_notes.push(note_id);
                    }
                    1 => {
                        if let Some(note_id) = held_notes.pop() {
                            let release = rng.gen_range(0..64u32);
                            allocator.note_off(note_id, release);
                        }
                    }
                    _ => allocator.begin_chunk(),
                }
                assert!(
                    allocator.active_voices().count() as u32 <= max_voices,
                    "active voice count exceeded the slot table"
                );
            }
        }
    }
}
