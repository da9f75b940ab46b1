use std::sync::Weak;

use crate::{graph::node::Instrument, midi::MidiMessage};

/*
Routing
=======

The router keeps one entry list per registered device. Incoming messages
arrive on device callback threads, never the audio thread, so dispatch may
allocate and log but must fail soft: a mapping whose instrument has been
disposed is skipped with a debug log, and an unknown device index is a
`None` from the mapping call, not a panic.

Mapping rules:

  direct note         every NoteOn/NoteOff forwarded to the instrument
  key range           forwarded when the range contains the note, optionally
                      mirrored so the keyboard runs high-to-low
  CC -> parameter     SetParameter(name, value/127)
  bend -> parameter   SetParameter(name, (bend+8192)/16383), same [0,1] shape
  CC -> transport     bound callback invoked with the normalized value
  note -> transport   bound callback invoked with velocity/127 on NoteOn

`map_controller` is the combined API: controller -1 selects the pitch-bend
channel instead of a CC number. Program change and unparsed bytes go to
pass-through hooks for logging or external echo. System realtime goes to the
realtime hook, which the engine points at the sequencer's clock-sync entry
points.
*/

/// Controller id accepted by [`MidiRouter::map_controller`] to mean "the
/// pitch bend channel" instead of a CC number.
pub const PITCH_BEND_CONTROLLER: i16 = -1;

type TransportCallback = Box<dyn Fn(f32) + Send>;

enum Mapping {
    Note {
        target: Weak<dyn Instrument>,
    },
    KeyRange {
        low: u8,
        high: u8,
        reversed: bool,
        target: Weak<dyn Instrument>,
    },
    CcToParameter {
        controller: u8,
        parameter: String,
        target: Weak<dyn Instrument>,
    },
    BendToParameter {
        parameter: String,
        target: Weak<dyn Instrument>,
    },
    CcToTransport {
        controller: u8,
        action: TransportCallback,
    },
    NoteToTransport {
        note: u8,
        action: TransportCallback,
    },
}

struct Device {
    name: String,
    entries: Vec<Mapping>,
}

/// Maps incoming MIDI onto instruments, parameters, and transport actions.
#[derive(Default)]
pub struct MidiRouter {
    devices: Vec<Device>,
    realtime_hook: Option<Box<dyn Fn(&MidiMessage) + Send>>,
    program_change_hook: Option<Box<dyn Fn(u8, u8) + Send>>,
    raw_hook: Option<Box<dyn Fn(&[u8]) + Send>>,
}

impl MidiRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a device and get the index used by all mapping calls.
    pub fn add_device(&mut self, name: impl Into<String>) -> usize {
        self.devices.push(Device {
            name: name.into(),
            entries: Vec::new(),
        });
        self.devices.len() - 1
    }

    pub fn device_index(&self, name: &str) -> Option<usize> {
        self.devices.iter().position(|d| d.name == name)
    }

    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Forward all notes from `device` to `target`.
    pub fn map_note(&mut self, device: usize, target: Weak<dyn Instrument>) -> Option<usize> {
        self.push_entry(device, Mapping::Note { target })
    }

    /// Forward notes in `[low, high]` to `target`. With `reversed` the range
    /// is mirrored, so the physical keyboard runs highest-to-lowest.
    pub fn map_key_range(
        &mut self,
        device: usize,
        low: u8,
        high: u8,
        reversed: bool,
        target: Weak<dyn Instrument>,
    ) -> Option<usize> {
        let (low, high) = if low <= high { (low, high) } else { (high, low) };
        self.push_entry(
            device,
            Mapping::KeyRange {
                low,
                high,
                reversed,
                target,
            },
        )
    }

    /// Map a controller to an instrument parameter, normalized to [0, 1].
    /// `controller` is a CC number, or [`PITCH_BEND_CONTROLLER`] for the
    /// pitch bend channel.
    pub fn map_controller(
        &mut self,
        device: usize,
        controller: i16,
        parameter: impl Into<String>,
        target: Weak<dyn Instrument>,
    ) -> Option<usize> {
        let mapping = if controller == PITCH_BEND_CONTROLLER {
            Mapping::BendToParameter {
                parameter: parameter.into(),
                target,
            }
        } else {
            Mapping::CcToParameter {
                controller: controller.clamp(0, 127) as u8,
                parameter: parameter.into(),
                target,
            }
        };
        self.push_entry(device, mapping)
    }

    /// Bind a CC to a transport action; the callback receives value/127.
    pub fn map_transport_controller(
        &mut self,
        device: usize,
        controller: u8,
        action: impl Fn(f32) + Send + 'static,
    ) -> Option<usize> {
        self.push_entry(
            device,
            Mapping::CcToTransport {
                controller,
                action: Box::new(action),
            },
        )
    }

    /// Bind a note to a transport action, fired on NoteOn with velocity/127.
    pub fn map_transport_note(
        &mut self,
        device: usize,
        note: u8,
        action: impl Fn(f32) + Send + 'static,
    ) -> Option<usize> {
        self.push_entry(
            device,
            Mapping::NoteToTransport {
                note,
                action: Box::new(action),
            },
        )
    }

    /// Remove one entry by the index a mapping call returned.
    pub fn remove_entry(&mut self, device: usize, entry: usize) -> Option<()> {
        let d = self.devices.get_mut(device)?;
        if entry >= d.entries.len() {
            return None;
        }
        d.entries.remove(entry);
        Some(())
    }

    /// Drop every entry for one device, keeping the device registered.
    pub fn clear_device(&mut self, device: usize) -> Option<()> {
        self.devices.get_mut(device)?.entries.clear();
        Some(())
    }

    pub fn clear_all(&mut self) {
        for d in &mut self.devices {
            d.entries.clear();
        }
    }

    pub fn entry_count(&self, device: usize) -> Option<usize> {
        self.devices.get(device).map(|d| d.entries.len())
    }

    /// Receives system realtime messages (clock sync, transport).
    pub fn set_realtime_hook(&mut self, hook: impl Fn(&MidiMessage) + Send + 'static) {
        self.realtime_hook = Some(Box::new(hook));
    }

    /// Receives program changes as `(channel, program)`.
    pub fn set_program_change_hook(&mut self, hook: impl Fn(u8, u8) + Send + 'static) {
        self.program_change_hook = Some(Box::new(hook));
    }

    /// Receives every raw byte buffer before parsing, for logging or echo.
    pub fn set_raw_hook(&mut self, hook: impl Fn(&[u8]) + Send + 'static) {
        self.raw_hook = Some(Box::new(hook));
    }

    /// Parse and dispatch one raw buffer from a device callback.
    pub fn handle_raw(&self, device: usize, bytes: &[u8]) {
        if let Some(hook) = &self.raw_hook {
            hook(bytes);
        }
        if let Some(message) = MidiMessage::parse(bytes) {
            self.handle(device, &message);
        }
    }

    /// Dispatch a parsed message against the device's entries.
    pub fn handle(&self, device: usize, message: &MidiMessage) {
        match message {
            MidiMessage::Clock
            | MidiMessage::Start
            | MidiMessage::Continue
            | MidiMessage::Stop
            | MidiMessage::SongPosition { .. } => {
                if let Some(hook) = &self.realtime_hook {
                    hook(message);
                }
                return;
            }
            MidiMessage::ProgramChange { channel, program } => {
                if let Some(hook) = &self.program_change_hook {
                    hook(*channel, *program);
                }
                return;
            }
            _ => {}
        }

        let Some(d) = self.devices.get(device) else {
            tracing::debug!(device, "message for unregistered device dropped");
            return;
        };

        for entry in &d.entries {
            match (entry, message) {
                (Mapping::Note { target }, MidiMessage::NoteOn { note, velocity, .. }) => {
                    if let Some(t) = upgrade(target) {
                        t.note_on(*note, *velocity);
                    }
                }
                (Mapping::Note { target }, MidiMessage::NoteOff { note, .. }) => {
                    if let Some(t) = upgrade(target) {
                        t.note_off(*note);
                    }
                }
                (
                    Mapping::KeyRange {
                        low,
                        high,
                        reversed,
                        target,
                    },
                    MidiMessage::NoteOn { note, velocity, .. },
                ) if (*low..=*high).contains(note) => {
                    if let Some(t) = upgrade(target) {
                        t.note_on(range_note(*note, *low, *high, *reversed), *velocity);
                    }
                }
                (
                    Mapping::KeyRange {
                        low,
                        high,
                        reversed,
                        target,
                    },
                    MidiMessage::NoteOff { note, .. },
                ) if (*low..=*high).contains(note) => {
                    if let Some(t) = upgrade(target) {
                        t.note_off(range_note(*note, *low, *high, *reversed));
                    }
                }
                (
                    Mapping::CcToParameter {
                        controller,
                        parameter,
                        target,
                    },
                    MidiMessage::ControlChange {
                        controller: cc,
                        value,
                        ..
                    },
                ) if controller == cc => {
                    if let Some(t) = upgrade(target) {
                        t.set_parameter(parameter, *value as f32 / 127.0);
                    }
                }
                (
                    Mapping::BendToParameter { parameter, target },
                    MidiMessage::PitchBend { value, .. },
                ) => {
                    if let Some(t) = upgrade(target) {
                        t.set_parameter(parameter, (*value as f32 + 8192.0) / 16383.0);
                    }
                }
                (
                    Mapping::CcToTransport { controller, action },
                    MidiMessage::ControlChange {
                        controller: cc,
                        value,
                        ..
                    },
                ) if controller == cc => {
                    action(*value as f32 / 127.0);
                }
                (
                    Mapping::NoteToTransport { note, action },
                    MidiMessage::NoteOn {
                        note: played,
                        velocity,
                        ..
                    },
                ) if note == played => {
                    action(*velocity as f32 / 127.0);
                }
                _ => {}
            }
        }
    }

    fn push_entry(&mut self, device: usize, mapping: Mapping) -> Option<usize> {
        let d = self.devices.get_mut(device)?;
        d.entries.push(mapping);
        Some(d.entries.len() - 1)
    }
}

fn upgrade(target: &Weak<dyn Instrument>) -> Option<std::sync::Arc<dyn Instrument>> {
    let t = target.upgrade();
    if t.is_none() {
        tracing::debug!("routing entry target disposed, skipping");
    }
    t
}

fn range_note(note: u8, low: u8, high: u8, reversed: bool) -> u8 {
    if reversed {
        high - (note - low)
    } else {
        note
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Recorder {
        notes: Mutex<Vec<(u8, u8)>>,
        offs: Mutex<Vec<u8>>,
        params: Mutex<Vec<(String, f32)>>,
    }

    impl Instrument for Recorder {
        fn note_on(&self, note: u8, velocity: u8) {
            self.notes.lock().unwrap().push((note, velocity));
        }

        fn note_off(&self, note: u8) {
            self.offs.lock().unwrap().push(note);
        }

        fn all_notes_off(&self) {}

        fn set_parameter(&self, name: &str, value: f32) {
            self.params.lock().unwrap().push((name.to_string(), value));
        }
    }

    fn recorder() -> (Arc<Recorder>, Weak<dyn Instrument>) {
        let rec = Arc::new(Recorder::default());
        let target: Arc<dyn Instrument> = rec.clone();
        (rec, Arc::downgrade(&target))
    }

    #[test]
    fn direct_note_route_forwards_on_and_off() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("pads");
        let (rec, target) = recorder();
        router.map_note(dev, target).unwrap();

        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            },
        );
        router.handle(
            dev,
            &MidiMessage::NoteOff {
                channel: 0,
                note: 60,
            },
        );

        assert_eq!(*rec.notes.lock().unwrap(), vec![(60, 100)]);
        assert_eq!(*rec.offs.lock().unwrap(), vec![60]);
    }

    #[test]
    fn key_range_filters_and_mirrors() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("split");
        let (rec, target) = recorder();
        router.map_key_range(dev, 48, 59, true, target).unwrap();

        // Outside the range: ignored.
        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 72,
                velocity: 100,
            },
        );
        // Lowest key plays the highest note when reversed.
        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 48,
                velocity: 100,
            },
        );

        assert_eq!(*rec.notes.lock().unwrap(), vec![(59, 100)]);
    }

    #[test]
    fn cc_maps_to_normalized_parameter() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("knobs");
        let (rec, target) = recorder();
        router.map_controller(dev, 74, "cutoff", target).unwrap();

        router.handle(
            dev,
            &MidiMessage::ControlChange {
                channel: 0,
                controller: 74,
                value: 127,
            },
        );
        router.handle(
            dev,
            &MidiMessage::ControlChange {
                channel: 0,
                controller: 1, // unmapped CC
                value: 64,
            },
        );

        let params = rec.params.lock().unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].0, "cutoff");
        assert!((params[0].1 - 1.0).abs() < 1e-6);
    }

    #[test]
    fn pitch_bend_sentinel_maps_the_bend_channel() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("wheel");
        let (rec, target) = recorder();
        router
            .map_controller(dev, PITCH_BEND_CONTROLLER, "bend", target)
            .unwrap();

        router.handle(
            dev,
            &MidiMessage::PitchBend {
                channel: 0,
                value: 0,
            },
        );

        let params = rec.params.lock().unwrap();
        assert_eq!(params[0].0, "bend");
        assert!((params[0].1 - 0.5).abs() < 1e-3, "center bend is mid-range");
    }

    #[test]
    fn transport_bindings_fire_with_normalized_values() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("transport");
        let fired = Arc::new(Mutex::new(Vec::new()));

        let f = fired.clone();
        router
            .map_transport_controller(dev, 20, move |v| f.lock().unwrap().push(v))
            .unwrap();
        let f = fired.clone();
        router
            .map_transport_note(dev, 36, move |v| f.lock().unwrap().push(v))
            .unwrap();

        router.handle(
            dev,
            &MidiMessage::ControlChange {
                channel: 0,
                controller: 20,
                value: 127,
            },
        );
        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 36,
                velocity: 127,
            },
        );

        let fired = fired.lock().unwrap();
        assert_eq!(fired.len(), 2);
        assert!(fired.iter().all(|v| (*v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn realtime_goes_to_the_hook_not_the_entries() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("clock");
        let pulses = Arc::new(Mutex::new(0u32));

        let p = pulses.clone();
        router.set_realtime_hook(move |m| {
            if matches!(m, MidiMessage::Clock) {
                *p.lock().unwrap() += 1;
            }
        });

        router.handle(dev, &MidiMessage::Clock);
        router.handle(dev, &MidiMessage::Clock);
        assert_eq!(*pulses.lock().unwrap(), 2);
    }

    #[test]
    fn disposed_target_is_skipped() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("gone");
        let (rec, target) = recorder();
        router.map_note(dev, target).unwrap();
        drop(rec);

        // Must not panic.
        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            },
        );
    }

    #[test]
    fn unknown_device_is_a_sentinel() {
        let mut router = MidiRouter::new();
        let (_rec, target) = recorder();
        assert!(router.map_note(7, target).is_none());
        assert!(router.clear_device(7).is_none());
        assert!(router.entry_count(7).is_none());

        // Dispatch to an unknown device is a logged no-op.
        router.handle(
            7,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            },
        );
    }

    #[test]
    fn clearing_removes_entries() {
        let mut router = MidiRouter::new();
        let dev = router.add_device("a");
        let (rec, target) = recorder();
        let entry = router.map_note(dev, target.clone()).unwrap();
        router.map_note(dev, target).unwrap();

        router.remove_entry(dev, entry).unwrap();
        assert_eq!(router.entry_count(dev), Some(1));

        router.clear_all();
        assert_eq!(router.entry_count(dev), Some(0));

        router.handle(
            dev,
            &MidiMessage::NoteOn {
                channel: 0,
                note: 60,
                velocity: 100,
            },
        );
        assert!(rec.notes.lock().unwrap().is_empty());
    }
}
