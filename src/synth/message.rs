/// Control message crossing from a control thread into the audio thread.
///
/// Kept `Copy` so pushing through the ring buffer never touches the heap.
#[derive(Debug, Copy, Clone)]
pub enum SynthMessage {
    NoteOn { note: u8, velocity: u8 },
    NoteOff { note: u8 },
    AllNotesOff,
    /// Parameter update; the controller resolves names to indices so the
    /// audio side never sees a string.
    Control { index: u32, value: f32 },
}
