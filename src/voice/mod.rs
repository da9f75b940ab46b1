//! Polyphonic voice allocation.
//!
//! A `VoicePool` owns a fixed arena of voice slots and a note-to-voice table.
//! It is generic over the synthesis running inside each slot: anything
//! implementing `VoiceProgram` can be pooled. The pool itself never does
//! synthesis math; it decides which slot sounds which note.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Allocation rules
================

note_on(note, velocity):
  1. If the note already maps to an active voice, retrigger that voice in
     place. The pool never holds two active voices for one note.
  2. Otherwise take the first free slot.
  3. Otherwise steal a victim according to the policy. The victim's map entry
     is cleared BEFORE the slot is reassigned, so the table never points at a
     voice sounding a different note.
  4. With stealing disabled, the note is dropped silently and counted.

note_off(note):
  The map entry is removed immediately, but the slot keeps rendering until
  the voice's own release logic reports inactive. Only the voice decides when
  its tail is finished.

render():
  Audio-thread summation of active voices into a mono block. Slots whose
  voice concluded its release are freed for reuse. No allocation, no locks.
*/

mod pool;

pub use pool::{VoicePool, VoiceState};

/// Which active voice loses its slot when the pool is full.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StealPolicy {
    /// Earliest trigger timestamp.
    Oldest,
    /// Lowest current output amplitude (needs the voice's amplitude probe).
    Quietest,
    /// Lowest sounding note.
    Lowest,
    /// Highest sounding note.
    Highest,
    /// A voice sounding the same note; falls back to Oldest when none does.
    SameNote,
}

/// Synthesis contract the pool requires from a voice.
///
/// The pool drives the lifecycle; everything else about the voice's state is
/// opaque. `render` ADDS into the buffer so the pool can sum voices without
/// a scratch copy per voice.
pub trait VoiceProgram: Send {
    /// Start (or restart) the voice at the given note and velocity.
    fn trigger(&mut self, note: u8, velocity: u8);

    /// Begin the release phase. The voice keeps sounding until `is_active`
    /// goes false.
    fn release(&mut self);

    /// Add this voice's next samples into `out` (mono).
    fn render(&mut self, out: &mut [f32]);

    /// Whether the voice is still producing sound (release tail included).
    fn is_active(&self) -> bool;

    /// Current output amplitude estimate for the Quietest stealing policy.
    /// Voices without a meaningful probe can leave the default.
    fn amplitude(&self) -> f32 {
        1.0
    }

    /// Normalized parameter update forwarded from the instrument surface.
    fn set_parameter(&mut self, _index: u32, _value: f32) {}
}

/// Builds identical voices for a pool. Closures returning a `VoiceProgram`
/// implement this automatically.
pub trait VoiceFactory: Send {
    type Voice: VoiceProgram;

    fn create_voice(&self) -> Self::Voice;
}

impl<F, T> VoiceFactory for F
where
    F: Fn() -> T + Send,
    T: VoiceProgram,
{
    type Voice = T;

    fn create_voice(&self) -> Self::Voice {
        self()
    }
}
