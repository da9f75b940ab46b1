//! Musical timing and patterns.
//!
//! `Pattern` holds note events positioned in beats and fires them at a
//! target instrument for any queried beat range. `TransportClock` maps wall
//! time to beats. `Sequencer` drives registered patterns against the clock
//! with a selectable precision strategy and MIDI clock sync.

pub mod clock;
pub mod pattern;
pub mod sequencer;

pub use clock::TransportClock;
pub use pattern::{NoteEvent, Pattern};
pub use sequencer::{ClockMode, Sequencer, SequencerEvent, TickMode};
