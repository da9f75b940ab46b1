use rtrb::{Consumer, RingBuffer};

use crate::{
    graph::node::{AudioNode, StreamFormat},
    synth::{controller::SynthController, message::SynthMessage},
    voice::{StealPolicy, VoiceFactory, VoicePool},
};

/// Capacity of the control-to-audio message queue, in messages.
const MESSAGE_QUEUE_CAPACITY: usize = 256;

/// Audio-thread half of a polyphonic instrument.
///
/// Owns the voice pool. Each `read` first drains pending control messages,
/// then sums active voices into the output block, so a note fired between
/// buffers lands at the start of the next one.
pub struct PolySynth<V: crate::voice::VoiceProgram> {
    pool: VoicePool<V>,
    rx: Consumer<SynthMessage>,
    sample_rate: f32,
}

/// Build a paired controller and synth.
///
/// The controller goes to control code (patterns, router, scripts); the
/// synth goes into the mixer. `params` defines the instrument's parameter
/// vocabulary in index order.
pub fn poly_synth<F: VoiceFactory>(
    factory: &F,
    max_voices: usize,
    policy: StealPolicy,
    params: Vec<String>,
    sample_rate: f32,
) -> (SynthController, PolySynth<F::Voice>) {
    let (tx, rx) = RingBuffer::new(MESSAGE_QUEUE_CAPACITY);

    let voices = (0..max_voices).map(|_| factory.create_voice()).collect();
    let pool = VoicePool::new(voices, policy);

    (
        SynthController::new(tx, params),
        PolySynth {
            pool,
            rx,
            sample_rate,
        },
    )
}

impl<V: crate::voice::VoiceProgram> PolySynth<V> {
    pub fn pool(&self) -> &VoicePool<V> {
        &self.pool
    }

    pub fn pool_mut(&mut self) -> &mut VoicePool<V> {
        &mut self.pool
    }

    fn drain_messages(&mut self) {
        while let Ok(msg) = self.rx.pop() {
            match msg {
                SynthMessage::NoteOn { note, velocity } => {
                    self.pool.note_on(note, velocity);
                }
                SynthMessage::NoteOff { note } => {
                    self.pool.note_off(note);
                }
                SynthMessage::AllNotesOff => {
                    self.pool.all_notes_off();
                }
                SynthMessage::Control { index, value } => {
                    self.pool.set_parameter(index, value);
                }
            }
        }
    }
}

impl<V: crate::voice::VoiceProgram> AudioNode for PolySynth<V> {
    fn format(&self) -> StreamFormat {
        StreamFormat::mono(self.sample_rate)
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        self.drain_messages();

        out.fill(0.0);
        self.pool.render(out);
        out.len()
    }
}
