use super::{StealPolicy, VoiceProgram};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    /// Available for allocation.
    Free,
    /// Sounding, before note_off.
    Held,
    /// Note released, tail still sounding.
    Releasing,
}

struct VoiceSlot<V> {
    voice: V,
    state: VoiceState,
    note: u8,
    /// Monotonic trigger order, for the Oldest policy.
    triggered_at: u64,
}

/// Fixed-capacity polyphony manager.
///
/// See the module docs for the allocation rules. All methods run on the
/// audio thread (driven by `synth::PolySynth` draining its message queue);
/// none of them allocates.
pub struct VoicePool<V: VoiceProgram> {
    slots: Vec<VoiceSlot<V>>,
    /// note -> slot index for fast release lookup. Every entry refers to a
    /// currently active (Held or Releasing-but-mapped-removed) voice; entries
    /// are cleared on note_off and on steal.
    note_to_voice: [Option<u8>; 128],
    policy: StealPolicy,
    stealing_enabled: bool,
    trigger_counter: u64,
    dropped_notes: u64,
}

impl<V: VoiceProgram> VoicePool<V> {
    pub fn new(voices: Vec<V>, policy: StealPolicy) -> Self {
        assert!(!voices.is_empty(), "voice pool needs at least one slot");
        assert!(voices.len() <= 128, "voice pool capped at 128 slots");

        let slots = voices
            .into_iter()
            .map(|voice| VoiceSlot {
                voice,
                state: VoiceState::Free,
                note: 0,
                triggered_at: 0,
            })
            .collect();

        Self {
            slots,
            note_to_voice: [None; 128],
            policy,
            stealing_enabled: true,
            trigger_counter: 0,
            dropped_notes: 0,
        }
    }

    pub fn set_policy(&mut self, policy: StealPolicy) {
        self.policy = policy;
    }

    /// With stealing disabled, a full pool drops new notes (counted, silent).
    pub fn set_stealing_enabled(&mut self, enabled: bool) {
        self.stealing_enabled = enabled;
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn active_voices(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| s.state != VoiceState::Free)
            .count()
    }

    /// Notes dropped because the pool was full with stealing disabled.
    pub fn dropped_notes(&self) -> u64 {
        self.dropped_notes
    }

    /// Allocate (or retrigger) a voice for `note`. Returns the slot index,
    /// or `None` when the note was dropped.
    pub fn note_on(&mut self, note: u8, velocity: u8) -> Option<usize> {
        debug_assert!(note < 128, "note validated at the ingestion boundary");

        // Same note already sounding: retrigger in place, no new allocation.
        if let Some(idx) = self.note_to_voice[note as usize] {
            let slot = &mut self.slots[idx as usize];
            if slot.state != VoiceState::Free {
                self.trigger_counter += 1;
                slot.voice.trigger(note, velocity);
                slot.state = VoiceState::Held;
                slot.triggered_at = self.trigger_counter;
                return Some(idx as usize);
            }
            self.note_to_voice[note as usize] = None;
        }

        let idx = match self.slots.iter().position(|s| s.state == VoiceState::Free) {
            Some(idx) => idx,
            None if self.stealing_enabled => {
                let victim = self.pick_victim(note);
                // Invalidate the victim's mapping before reassigning the slot.
                let victim_note = self.slots[victim].note;
                if self.note_to_voice[victim_note as usize] == Some(victim as u8) {
                    self.note_to_voice[victim_note as usize] = None;
                }
                victim
            }
            None => {
                self.dropped_notes += 1;
                return None;
            }
        };

        self.trigger_counter += 1;
        let slot = &mut self.slots[idx];
        slot.voice.trigger(note, velocity);
        slot.state = VoiceState::Held;
        slot.note = note;
        slot.triggered_at = self.trigger_counter;
        self.note_to_voice[note as usize] = Some(idx as u8);
        Some(idx)
    }

    /// Signal release and unmap the note immediately. The slot keeps
    /// sounding until its own release logic concludes.
    pub fn note_off(&mut self, note: u8) {
        debug_assert!(note < 128);

        if let Some(idx) = self.note_to_voice[note as usize].take() {
            let slot = &mut self.slots[idx as usize];
            if slot.state == VoiceState::Held {
                slot.voice.release();
                slot.state = VoiceState::Releasing;
            }
        }
    }

    /// Release every active voice and clear the note table in one step.
    pub fn all_notes_off(&mut self) {
        self.note_to_voice = [None; 128];
        for slot in &mut self.slots {
            if slot.state == VoiceState::Held {
                slot.voice.release();
                slot.state = VoiceState::Releasing;
            }
        }
    }

    /// Forward a parameter update to every voice.
    pub fn set_parameter(&mut self, index: u32, value: f32) {
        for slot in &mut self.slots {
            slot.voice.set_parameter(index, value);
        }
    }

    /// Sum active voices into `out` (mono, additive). Voices whose release
    /// finished are freed for reuse.
    pub fn render(&mut self, out: &mut [f32]) {
        for slot in &mut self.slots {
            if slot.state == VoiceState::Free {
                continue;
            }

            slot.voice.render(out);

            if slot.state == VoiceState::Releasing && !slot.voice.is_active() {
                slot.state = VoiceState::Free;
            }
        }
    }

    fn pick_victim(&self, incoming_note: u8) -> usize {
        let active = || {
            self.slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state != VoiceState::Free)
        };

        let oldest = || {
            active()
                .min_by_key(|(_, s)| s.triggered_at)
                .map(|(i, _)| i)
                .unwrap_or(0)
        };

        match self.policy {
            StealPolicy::Oldest => oldest(),
            StealPolicy::Quietest => active()
                .min_by(|(_, a), (_, b)| {
                    a.voice
                        .amplitude()
                        .partial_cmp(&b.voice.amplitude())
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .map(|(i, _)| i)
                .unwrap_or(0),
            StealPolicy::Lowest => active()
                .min_by_key(|(_, s)| s.note)
                .map(|(i, _)| i)
                .unwrap_or(0),
            StealPolicy::Highest => active()
                .max_by_key(|(_, s)| s.note)
                .map(|(i, _)| i)
                .unwrap_or(0),
            StealPolicy::SameNote => active()
                .find(|(_, s)| s.note == incoming_note)
                .map(|(i, _)| i)
                .unwrap_or_else(oldest),
        }
    }

    #[cfg(test)]
    fn slot_state(&self, idx: usize) -> VoiceState {
        self.slots[idx].state
    }

    #[cfg(test)]
    fn slot_note(&self, idx: usize) -> u8 {
        self.slots[idx].note
    }
}
