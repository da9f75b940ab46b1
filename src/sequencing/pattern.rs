use std::sync::Weak;

use crate::{error::ValidationError, graph::node::Instrument};

/*
Beat-Range Queries
==================

A pattern is queried with half-open absolute beat ranges [start, end). Each
event lives at a local position inside the loop, so an event at local beat b
in a loop of length L occurs at absolute beats b, b+L, b+2L, ... while the
pattern loops.

process(start, end) must:

  - fire every occurrence whose trigger point falls in [start, end), across
    the loop seam (a range like [3.0, 4.5) over a 4-beat loop covers the end
    of one iteration and the start of the next),
  - fire EVERY iteration a multi-loop range contains, not just one,
  - fire the matching NoteOff at trigger + duration, which may land in a
    later call (tracked in a pending list); an off due exactly at the range
    end fires in that call, exactly once, and
  - fire zero-duration notes as an on/off pair within one call.

Ordering across on/off at equal beats uses a scheduling sequence number: an
off scheduled by an earlier call sorts before a new on at the same beat, and
a note's own off never precedes its on. Scratch vectors are reused between
calls so AudioRate scheduling can run this inline on the audio thread.
*/

/// One note in a pattern, positioned relative to the loop start.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteEvent {
    pub note: u8,
    /// Local position in beats, in `[0, loop_length)`.
    pub beat: f64,
    /// Length in beats. Zero means on and off fire together.
    pub duration: f64,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy)]
enum Action {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

/// An ordered set of note events with loop semantics and a target
/// instrument.
///
/// The pattern holds its target weakly: a disposed instrument silently ends
/// the pattern's output instead of keeping the instrument alive or crashing
/// the scheduling thread.
pub struct Pattern {
    events: Vec<NoteEvent>,
    loop_length_beats: f64,
    looping: bool,
    /// Absolute gate: nothing fires before this beat.
    start_beat: Option<f64>,
    enabled: bool,
    target: Weak<dyn Instrument>,

    /// NoteOffs scheduled but not yet fired: (absolute beat, seq, note).
    pending_offs: Vec<(f64, u64, u8)>,
    /// Reused per call; (beat, seq, action).
    scratch: Vec<(f64, u64, Action)>,
    action_counter: u64,
}

impl Pattern {
    pub const DEFAULT_LOOP_LENGTH: f64 = 4.0;

    pub fn new(target: Weak<dyn Instrument>) -> Self {
        Self {
            events: Vec::new(),
            loop_length_beats: Self::DEFAULT_LOOP_LENGTH,
            looping: true,
            start_beat: None,
            enabled: true,
            target,
            pending_offs: Vec::with_capacity(32),
            scratch: Vec::with_capacity(64),
            action_counter: 0,
        }
    }

    /// Set the loop length. Events already outside the new length are
    /// unreachable and get dropped.
    pub fn set_loop_length(&mut self, beats: f64) -> Result<&mut Self, ValidationError> {
        if beats <= 0.0 {
            return Err(ValidationError::NonPositiveLoopLength { length: beats });
        }
        self.loop_length_beats = beats;
        self.events.retain(|e| e.beat < beats);
        Ok(self)
    }

    pub fn loop_length(&self) -> f64 {
        self.loop_length_beats
    }

    pub fn set_looping(&mut self, looping: bool) -> &mut Self {
        self.looping = looping;
        self
    }

    pub fn set_start_beat(&mut self, beat: Option<f64>) -> &mut Self {
        self.start_beat = beat;
        self
    }

    pub fn set_enabled(&mut self, enabled: bool) -> &mut Self {
        self.enabled = enabled;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Add a note. Chainable; validation failures reject the note so no
    /// unreachable event ever enters the list.
    pub fn add_note(
        &mut self,
        note: u8,
        beat: f64,
        duration: f64,
        velocity: u8,
    ) -> Result<&mut Self, ValidationError> {
        if note > 127 {
            return Err(ValidationError::NoteOutOfRange { note: note as i32 });
        }
        if velocity > 127 {
            return Err(ValidationError::VelocityOutOfRange {
                velocity: velocity as i32,
            });
        }
        if !(0.0..self.loop_length_beats).contains(&beat) {
            return Err(ValidationError::BeatOutOfLoop {
                beat,
                loop_length: self.loop_length_beats,
            });
        }
        if duration < 0.0 {
            return Err(ValidationError::NegativeDuration { duration });
        }

        // Keep events ordered by beat; ties keep insertion order.
        let pos = self
            .events
            .partition_point(|e| e.beat <= beat);
        self.events.insert(
            pos,
            NoteEvent {
                note,
                beat,
                duration,
                velocity,
            },
        );
        Ok(self)
    }

    pub fn events(&self) -> &[NoteEvent] {
        &self.events
    }

    /// Fire NoteOn/NoteOff on the target for every trigger point in
    /// `[start_beat, end_beat)`. `bpm` is the tempo the range was derived
    /// under, carried for diagnostics.
    pub fn process(&mut self, start_beat: f64, end_beat: f64, bpm: f64) {
        if end_beat <= start_beat {
            return;
        }

        let Some(target) = self.target.upgrade() else {
            // Target disposed: drop whatever we still owed it.
            if !self.pending_offs.is_empty() {
                tracing::debug!("pattern target disposed; discarding pending note-offs");
                self.pending_offs.clear();
            }
            return;
        };

        self.scratch.clear();

        if self.enabled {
            self.collect_note_ons(start_beat, end_beat);
        }

        // Due offs, including ones just scheduled above (zero/short
        // durations) and overdue ones from before a skip. Unlike ons, an
        // off landing exactly on `end_beat` fires now; it leaves the
        // pending list here, so the next range cannot fire it again.
        let scratch = &mut self.scratch;
        self.pending_offs.retain(|&(beat, seq, note)| {
            if beat <= end_beat {
                scratch.push((beat, seq, Action::Off { note }));
                false
            } else {
                true
            }
        });

        self.scratch
            .sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        tracing::trace!(
            start_beat,
            end_beat,
            bpm,
            actions = self.scratch.len(),
            "pattern tick"
        );

        for &(_, _, action) in &self.scratch {
            match action {
                Action::On { note, velocity } => target.note_on(note, velocity),
                Action::Off { note } => target.note_off(note),
            }
        }
    }

    fn collect_note_ons(&mut self, start_beat: f64, end_beat: f64) {
        let gate = self.start_beat.unwrap_or(0.0);
        let from = start_beat.max(gate);
        if end_beat <= from {
            return;
        }

        let length = self.loop_length_beats;

        if self.looping {
            let first_iter = (from / length).floor() as i64;
            let last_iter = (end_beat / length).ceil() as i64;

            for k in first_iter..=last_iter {
                let base = k as f64 * length;
                for event in &self.events {
                    let t = base + event.beat;
                    if t >= from && t < end_beat {
                        self.action_counter += 1;
                        self.scratch.push((
                            t,
                            self.action_counter,
                            Action::On {
                                note: event.note,
                                velocity: event.velocity,
                            },
                        ));
                        self.action_counter += 1;
                        self.pending_offs
                            .push((t + event.duration, self.action_counter, event.note));
                    }
                }
            }
        } else {
            for event in &self.events {
                let t = event.beat + gate;
                if t >= from && t < end_beat {
                    self.action_counter += 1;
                    self.scratch.push((
                        t,
                        self.action_counter,
                        Action::On {
                            note: event.note,
                            velocity: event.velocity,
                        },
                    ));
                    self.action_counter += 1;
                    self.pending_offs
                        .push((t + event.duration, self.action_counter, event.note));
                }
            }
        }
    }

    /// Silence everything this pattern still has sounding.
    pub fn stop(&mut self) {
        if let Some(target) = self.target.upgrade() {
            for &(_, _, note) in &self.pending_offs {
                target.note_off(note);
            }
        }
        self.pending_offs.clear();
    }

    /// Notes currently sounding from this pattern.
    pub fn sounding_notes(&self) -> usize {
        self.pending_offs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Call {
        On(u8, u8),
        Off(u8),
    }

    /// Records every call, for asserting exact firing order.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<Call>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<Call> {
            std::mem::take(&mut self.calls.lock().unwrap())
        }
    }

    impl Instrument for Recorder {
        fn note_on(&self, note: u8, velocity: u8) {
            self.calls.lock().unwrap().push(Call::On(note, velocity));
        }

        fn note_off(&self, note: u8) {
            self.calls.lock().unwrap().push(Call::Off(note));
        }

        fn all_notes_off(&self) {}

        fn set_parameter(&self, _name: &str, _value: f32) {}
    }

    fn pattern_with_recorder() -> (Arc<Recorder>, Pattern) {
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn Instrument> = recorder.clone();
        // `recorder` shares the allocation, so it keeps the weak target alive.
        let pattern = Pattern::new(Arc::downgrade(&target));
        (recorder, pattern)
    }

    #[test]
    fn add_note_validates_ranges() {
        let (_rec, mut p) = pattern_with_recorder();
        assert!(p.add_note(128, 0.0, 1.0, 100).is_err());
        assert!(p.add_note(60, 0.0, 1.0, 200).is_err());
        assert!(p.add_note(60, 4.0, 1.0, 100).is_err()); // at loop length
        assert!(p.add_note(60, -0.5, 1.0, 100).is_err());
        assert!(p.add_note(60, 0.0, -1.0, 100).is_err());
        assert!(p.add_note(60, 3.9, 1.0, 100).is_ok());
    }

    #[test]
    fn add_note_keeps_beat_order_with_stable_ties() {
        let (_rec, mut p) = pattern_with_recorder();
        p.add_note(62, 1.0, 0.5, 100).unwrap();
        p.add_note(60, 0.0, 0.5, 100).unwrap();
        p.add_note(64, 1.0, 0.5, 100).unwrap();

        let notes: Vec<u8> = p.events().iter().map(|e| e.note).collect();
        assert_eq!(notes, vec![60, 62, 64]);
    }

    #[test]
    fn fires_events_in_range() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.0, 0.5, 100).unwrap();
        p.add_note(62, 1.0, 0.5, 100).unwrap();

        p.process(0.0, 1.0, 120.0);
        assert_eq!(rec.take(), vec![Call::On(60, 100), Call::Off(60)]);

        p.process(1.0, 2.0, 120.0);
        assert_eq!(rec.take(), vec![Call::On(62, 100), Call::Off(62)]);
    }

    #[test]
    fn loop_wraparound_fires_once_with_correct_off() {
        // Loop of 4, note at 3.5 for 1.0 beat: querying [3.0, 4.5) fires
        // the on at 3.5 and the off at 4.5 in that same call, once each.
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 3.5, 1.0, 100).unwrap();

        p.process(3.0, 4.5, 120.0);
        assert_eq!(rec.take(), vec![Call::On(60, 100), Call::Off(60)]);
        assert_eq!(p.sounding_notes(), 0);

        // The off already fired; the next range must not repeat it.
        p.process(4.5, 5.5, 120.0);
        assert_eq!(rec.take(), vec![]);
    }

    #[test]
    fn range_spanning_multiple_loops_fires_each_iteration() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.0, 0.25, 100).unwrap();

        // Two full loops in one query: two on/off pairs.
        p.process(0.0, 8.0, 120.0);
        let calls = rec.take();
        let ons = calls.iter().filter(|c| matches!(c, Call::On(..))).count();
        let offs = calls.iter().filter(|c| matches!(c, Call::Off(_))).count();
        assert_eq!(ons, 2);
        assert_eq!(offs, 2);
    }

    #[test]
    fn zero_duration_fires_on_then_off_in_one_call() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 1.0, 0.0, 100).unwrap();

        p.process(0.0, 2.0, 120.0);
        assert_eq!(rec.take(), vec![Call::On(60, 100), Call::Off(60)]);
        assert_eq!(p.sounding_notes(), 0);
    }

    #[test]
    fn overlapping_same_pitch_fires_independent_pairs() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.0, 1.5, 100).unwrap();
        p.add_note(60, 1.0, 1.5, 90).unwrap();

        p.process(0.0, 4.0, 120.0);
        let calls = rec.take();
        assert_eq!(
            calls,
            vec![
                Call::On(60, 100),
                Call::On(60, 90),
                Call::Off(60),
                Call::Off(60),
            ]
        );
    }

    #[test]
    fn non_looping_pattern_fires_single_pass() {
        let (rec, mut p) = pattern_with_recorder();
        p.set_looping(false);
        p.add_note(60, 0.5, 0.25, 100).unwrap();

        p.process(0.0, 4.0, 120.0);
        p.process(4.0, 8.0, 120.0);
        let calls = rec.take();
        assert_eq!(calls, vec![Call::On(60, 100), Call::Off(60)]);
    }

    #[test]
    fn start_beat_gates_firing() {
        let (rec, mut p) = pattern_with_recorder();
        p.set_start_beat(Some(8.0));
        p.add_note(60, 0.0, 0.5, 100).unwrap();

        p.process(0.0, 8.0, 120.0);
        assert!(rec.take().is_empty());

        p.process(8.0, 9.0, 120.0);
        let calls = rec.take();
        assert!(calls.contains(&Call::On(60, 100)));
    }

    #[test]
    fn disabled_pattern_still_flushes_pending_offs() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.0, 2.0, 100).unwrap();

        p.process(0.0, 1.0, 120.0);
        assert_eq!(rec.take(), vec![Call::On(60, 100)]);

        p.set_enabled(false);
        p.process(1.0, 3.0, 120.0);
        assert_eq!(rec.take(), vec![Call::Off(60)]);
    }

    #[test]
    fn stop_silences_sounding_notes() {
        let (rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.0, 4.0, 100).unwrap();
        p.add_note(64, 0.5, 4.0, 100).unwrap();

        p.process(0.0, 1.0, 120.0);
        rec.take();

        p.stop();
        let calls = rec.take();
        assert!(calls.contains(&Call::Off(60)));
        assert!(calls.contains(&Call::Off(64)));
        assert_eq!(p.sounding_notes(), 0);
    }

    #[test]
    fn dead_target_fails_soft() {
        let recorder = Arc::new(Recorder::default());
        let target: Arc<dyn Instrument> = recorder.clone();
        let mut p = Pattern::new(Arc::downgrade(&target));
        p.add_note(60, 0.0, 1.0, 100).unwrap();
        drop(target);
        drop(recorder);

        // Must not panic.
        p.process(0.0, 4.0, 120.0);
    }

    #[test]
    fn shrinking_loop_drops_unreachable_events() {
        let (_rec, mut p) = pattern_with_recorder();
        p.add_note(60, 0.5, 0.5, 100).unwrap();
        p.add_note(62, 3.5, 0.5, 100).unwrap();

        p.set_loop_length(2.0).unwrap();
        assert_eq!(p.events().len(), 1);
        assert!(p.set_loop_length(0.0).is_err());
    }
}
