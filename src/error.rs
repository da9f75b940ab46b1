//! Error taxonomy.
//!
//! Validation and routing errors are recoverable and local. Resource
//! exhaustion is observable through counters, never an error value. Faults on
//! the audio thread degrade to silence for the node that misbehaved; no error
//! type ever crosses the audio boundary.

/// A value rejected at an ingestion boundary (MIDI input, `Pattern::add_note`,
/// instrument control surface). Invalid data never reaches the audio thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ValidationError {
    /// MIDI note outside 0..=127.
    NoteOutOfRange { note: i32 },
    /// MIDI velocity outside 0..=127.
    VelocityOutOfRange { velocity: i32 },
    /// Beat position outside `[0, loop_length)`.
    BeatOutOfLoop { beat: f64, loop_length: f64 },
    /// Negative note duration. Zero is allowed; the on and off fire
    /// together.
    NegativeDuration { duration: f64 },
    /// Loop length must be positive.
    NonPositiveLoopLength { length: f64 },
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::NoteOutOfRange { note } => {
                write!(f, "MIDI note {} out of range 0..=127", note)
            }
            ValidationError::VelocityOutOfRange { velocity } => {
                write!(f, "MIDI velocity {} out of range 0..=127", velocity)
            }
            ValidationError::BeatOutOfLoop { beat, loop_length } => {
                write!(
                    f,
                    "beat position {} outside loop range [0, {})",
                    beat, loop_length
                )
            }
            ValidationError::NegativeDuration { duration } => {
                write!(f, "note duration {} must not be negative", duration)
            }
            ValidationError::NonPositiveLoopLength { length } => {
                write!(f, "loop length {} must be > 0", length)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// Errors from engine construction and device lifecycle.
#[derive(Debug)]
pub enum EngineError {
    /// No usable audio output device.
    NoOutputDevice,
    /// The audio backend refused the stream configuration.
    Stream(String),
    /// MIDI device enumeration or connection failed.
    Midi(String),
    /// The mixer's channel arena is full.
    MixerFull { capacity: usize },
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NoOutputDevice => write!(f, "no default audio output device available"),
            EngineError::Stream(msg) => write!(f, "audio stream error: {}", msg),
            EngineError::Midi(msg) => write!(f, "MIDI device error: {}", msg),
            EngineError::MixerFull { capacity } => {
                write!(f, "mixer channel arena full ({} slots)", capacity)
            }
        }
    }
}

impl std::error::Error for EngineError {}
