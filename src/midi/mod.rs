//! MIDI ingestion and routing.
//!
//! `MidiMessage::parse` turns raw device bytes into validated messages at the
//! boundary, `MidiRouter` maps them onto instruments, parameters, and
//! transport actions, and `MidiInputs` owns the midir device connections that
//! feed the router.

pub mod input;
pub mod router;

pub use input::{MidiDeviceInfo, MidiInputs};
pub use router::{MidiRouter, PITCH_BEND_CONTROLLER};

/// A decoded MIDI message, channel voice or system realtime.
///
/// Note-on with velocity zero decodes as `NoteOff` per the MIDI standard, so
/// downstream code never sees the running-status idiom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiMessage {
    NoteOn { channel: u8, note: u8, velocity: u8 },
    NoteOff { channel: u8, note: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    /// Bend amount in `-8192..=8191`, zero centered.
    PitchBend { channel: u8, value: i16 },
    Clock,
    Start,
    Continue,
    Stop,
    /// Position in sixteenth notes from the start of the song.
    SongPosition { position: u16 },
}

impl MidiMessage {
    /// Decode one message from raw bytes. Returns `None` for truncated,
    /// malformed, or unsupported messages; data bytes with the high bit set
    /// are rejected rather than masked.
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        let status = *bytes.first()?;

        // System realtime has no data bytes.
        match status {
            0xF8 => return Some(Self::Clock),
            0xFA => return Some(Self::Start),
            0xFB => return Some(Self::Continue),
            0xFC => return Some(Self::Stop),
            0xF2 => {
                let lsb = data_byte(bytes, 1)?;
                let msb = data_byte(bytes, 2)?;
                return Some(Self::SongPosition {
                    position: (msb as u16) << 7 | lsb as u16,
                });
            }
            _ => {}
        }

        let channel = status & 0x0F;
        match status & 0xF0 {
            0x90 => {
                let note = data_byte(bytes, 1)?;
                let velocity = data_byte(bytes, 2)?;
                if velocity == 0 {
                    Some(Self::NoteOff { channel, note })
                } else {
                    Some(Self::NoteOn {
                        channel,
                        note,
                        velocity,
                    })
                }
            }
            0x80 => {
                let note = data_byte(bytes, 1)?;
                let _velocity = data_byte(bytes, 2)?;
                Some(Self::NoteOff { channel, note })
            }
            0xB0 => Some(Self::ControlChange {
                channel,
                controller: data_byte(bytes, 1)?,
                value: data_byte(bytes, 2)?,
            }),
            0xC0 => Some(Self::ProgramChange {
                channel,
                program: data_byte(bytes, 1)?,
            }),
            0xE0 => {
                let lsb = data_byte(bytes, 1)? as i16;
                let msb = data_byte(bytes, 2)? as i16;
                Some(Self::PitchBend {
                    channel,
                    value: (msb << 7 | lsb) - 8192,
                })
            }
            _ => None,
        }
    }
}

fn data_byte(bytes: &[u8], index: usize) -> Option<u8> {
    let b = *bytes.get(index)?;
    if b > 127 {
        return None;
    }
    Some(b)
}
