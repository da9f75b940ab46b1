//! Instrument plumbing between control threads and the audio thread.
//!
//! A polyphonic instrument is split in two: a `PolySynth` living on the
//! audio thread (owns the voice pool, drains its message queue at the top of
//! every read) and a `SynthController` held by control code (patterns, the
//! MIDI router, scripts). The two halves share a single-producer ring
//! buffer, so note events never take a lock the audio thread can contend on.

mod controller;
mod message;
mod poly;

pub use controller::SynthController;
pub use message::SynthMessage;
pub use poly::{poly_synth, PolySynth};
