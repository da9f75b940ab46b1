use std::sync::Mutex;

use rtrb::Producer;

use crate::{
    error::ValidationError,
    graph::node::Instrument,
    synth::message::SynthMessage,
};

/// Control-thread half of a polyphonic instrument.
///
/// Implements the `Instrument` surface by pushing messages into the paired
/// `PolySynth`'s ring buffer. The producer sits behind a mutex so the
/// sequencer thread and MIDI callback threads can share one controller; the
/// lock guards a single push and is never taken on the audio thread.
pub struct SynthController {
    tx: Mutex<Producer<SynthMessage>>,
    /// Parameter vocabulary: position = index sent to the audio side.
    params: Vec<String>,
}

impl SynthController {
    pub(crate) fn new(tx: Producer<SynthMessage>, params: Vec<String>) -> Self {
        Self {
            tx: Mutex::new(tx),
            params,
        }
    }

    /// Names this instrument accepts through `set_parameter`.
    pub fn parameter_names(&self) -> &[String] {
        &self.params
    }

    fn push(&self, msg: SynthMessage) {
        let mut tx = match self.tx.lock() {
            Ok(tx) => tx,
            Err(_) => return,
        };
        if tx.push(msg).is_err() {
            // Queue full: the audio thread is stalled or the control side is
            // flooding. Dropping is the only non-blocking option here.
            tracing::warn!(?msg, "synth message queue full; dropping");
        }
    }

    fn validate(note: u8, velocity: u8) -> Result<(), ValidationError> {
        if note > 127 {
            return Err(ValidationError::NoteOutOfRange { note: note as i32 });
        }
        if velocity > 127 {
            return Err(ValidationError::VelocityOutOfRange {
                velocity: velocity as i32,
            });
        }
        Ok(())
    }
}

impl Instrument for SynthController {
    fn note_on(&self, note: u8, velocity: u8) {
        if let Err(err) = Self::validate(note, velocity) {
            tracing::debug!(%err, "rejected note_on at boundary");
            return;
        }
        self.push(SynthMessage::NoteOn { note, velocity });
    }

    fn note_off(&self, note: u8) {
        if note > 127 {
            tracing::debug!(note, "rejected note_off at boundary");
            return;
        }
        self.push(SynthMessage::NoteOff { note });
    }

    fn all_notes_off(&self) {
        self.push(SynthMessage::AllNotesOff);
    }

    fn set_parameter(&self, name: &str, value: f32) {
        match self.params.iter().position(|p| p == name) {
            Some(index) => self.push(SynthMessage::Control {
                index: index as u32,
                value,
            }),
            None => tracing::debug!(name, "unknown parameter ignored"),
        }
    }
}
