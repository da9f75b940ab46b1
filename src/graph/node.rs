/// Interleaved stream format a node produces or expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamFormat {
    /// Samples per second, per channel.
    pub sample_rate: f32,
    /// Interleaved channel count (1 = mono, 2 = stereo).
    pub channels: usize,
}

impl StreamFormat {
    pub fn new(sample_rate: f32, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
        }
    }

    pub fn mono(sample_rate: f32) -> Self {
        Self::new(sample_rate, 1)
    }

    pub fn stereo(sample_rate: f32) -> Self {
        Self::new(sample_rate, 2)
    }
}

/// Core pull contract for audio producers.
///
/// `read` fills `out` with up to `out.len() / channels` interleaved frames
/// and returns the number of frames written. It runs on the audio thread, so
/// implementations must not allocate or block. Returning fewer frames than
/// requested leaves the remainder of `out` untouched; callers treat it as
/// silence.
pub trait AudioNode: Send {
    fn format(&self) -> StreamFormat;

    fn read(&mut self, out: &mut [f32]) -> usize;

    /// Whether this node is still producing sound.
    ///
    /// Deferred teardown uses this to avoid cutting off a release tail.
    fn is_active(&self) -> bool {
        true
    }
}

/// Allow boxed nodes to be used as nodes (for dynamic dispatch).
impl AudioNode for Box<dyn AudioNode> {
    fn format(&self) -> StreamFormat {
        (**self).format()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        (**self).read(out)
    }

    fn is_active(&self) -> bool {
        (**self).is_active()
    }
}

/// Control surface of an instrument, callable from scheduling and MIDI
/// callback threads.
///
/// Methods take `&self`: implementations forward through a realtime-safe
/// queue (see `synth::SynthController`) rather than mutating audio-thread
/// state directly, so patterns and the router can share one handle through
/// `Arc`/`Weak` without holding a lock across synthesis.
pub trait Instrument: Send + Sync {
    fn note_on(&self, note: u8, velocity: u8);

    fn note_off(&self, note: u8);

    fn all_notes_off(&self);

    /// Set a named parameter to a normalized value. Unknown names are
    /// ignored; instruments expose their own parameter vocabulary.
    fn set_parameter(&self, name: &str, value: f32);
}

/// In-place block processor that can sit in an `EffectChain`.
///
/// The chain applies each stage's dry/wet mix and bypass outside `process`,
/// so implementations only transform the buffer.
pub trait Effect: Send {
    /// Transform `io` in place. `frames` is the frame count; the buffer is
    /// interleaved at the chain's format.
    fn process(&mut self, io: &mut [f32], frames: usize);

    fn set_parameter(&mut self, _name: &str, _value: f32) {}

    fn parameter(&self, _name: &str) -> Option<f32> {
        None
    }
}
