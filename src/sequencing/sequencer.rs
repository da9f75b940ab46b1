use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    events::EventHub,
    sequencing::{clock::TransportClock, pattern::Pattern},
};

/*
Sequencer
=========

The sequencer owns the transport state machine (Stopped <-> Running) and
drives every registered pattern against the beat clock. One of three tick
strategies advances the beat:

  Standard        A timer thread wakes every ~10 ms, derives elapsed beats
                  from the wall clock, and processes patterns. Cheapest,
                  most jitter.

  HighPrecision   Same loop at a ~1 ms target, sleeping most of the interval
                  and spinning the rest for sub-millisecond wakeups.

  AudioRate       No thread. The audio callback calls `advance_audio`, which
                  advances the beat by exactly frames/rate * bpm/60. Sample
                  driven, so timing cannot drift from the audio stream;
                  triggering is quantized to buffer boundaries.

Every tick hands ALL patterns the same half-open beat range, in registration
order. `stop()` joins the tick thread before touching the patterns, so once
it returns no further `Pattern::process` call can occur.

Jitter is measured per tick as |actual - expected| wakeup error and kept as
an exponential rolling average. Crossing the configured threshold emits a
diagnostic event; playback is never altered.

External MIDI clock (24 pulses per quarter note) can replace the internal
timer as the beat source. In `Both` mode the sequencer stays master: its own
driver advances the beat and emits `ClockPulse` events for downstream
devices, incoming pulses are ignored, and external
Start/Stop/Continue/SongPosition still control the transport. In `Internal`
mode everything from the external clock is ignored.
*/

/// Scheduling strategy. See the module comment for the trade-offs.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickMode {
    Standard,
    HighPrecision,
    AudioRate,
}

/// Where beat advancement comes from.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMode {
    /// Internal timer (or audio callback) only.
    Internal,
    /// Incoming 24 PPQN pulses drive the beat; the internal timer is idle.
    External,
    /// Internal clock drives the beat and emits pulses; external transport
    /// commands are still honored.
    Both,
}

/// Transport and diagnostic notifications.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SequencerEvent {
    PlaybackStarted,
    PlaybackStopped,
    PatternAdded,
    BpmChanged { bpm: f64 },
    /// Rolling-average timing error exceeded the configured threshold.
    TimingJitterDetected { average_ms: f64 },
    /// Master clock pulse (24 per quarter note), emitted in `Both` mode.
    ClockPulse,
}

const STANDARD_INTERVAL: Duration = Duration::from_millis(10);
const HIGH_PRECISION_INTERVAL: Duration = Duration::from_millis(1);
/// How much of the high-precision interval is spun instead of slept.
const SPIN_MARGIN: Duration = Duration::from_micros(200);

const PULSES_PER_BEAT: f64 = 24.0;

#[derive(Debug, Default)]
struct JitterStats {
    average_ms: f64,
    samples: u64,
    above_threshold: bool,
}

impl JitterStats {
    /// Exponential rolling average; returns true when the average first
    /// crosses the threshold so the event fires once per excursion.
    fn record(&mut self, error_ms: f64, threshold_ms: f64) -> bool {
        self.samples += 1;
        if self.samples == 1 {
            self.average_ms = error_ms;
        } else {
            self.average_ms = self.average_ms * 0.9 + error_ms * 0.1;
        }

        let above = self.average_ms > threshold_ms;
        let crossed = above && !self.above_threshold;
        self.above_threshold = above;
        crossed
    }

    fn reset(&mut self) {
        *self = JitterStats::default();
    }
}

#[derive(Debug)]
struct ExternalSync {
    last_pulse: Option<Instant>,
    effective_bpm: f64,
    running: bool,
}

struct Inner {
    clock: TransportClock,
    patterns: Vec<Arc<Mutex<Pattern>>>,
    last_beat: f64,
    jitter: JitterStats,
    clock_mode: ClockMode,
    external: ExternalSync,
    /// Next beat at which a master pulse is due (Both mode).
    next_pulse_beat: f64,
    /// Frames reported through `advance_audio` since the last re-anchor.
    audio_frames: u64,
    /// Beat at the last re-anchor. The audio-rate beat is derived from the
    /// running frame total, not summed per block, so rounding error cannot
    /// accumulate across blocks.
    audio_anchor_beat: f64,
}

impl Inner {
    /// Advance to `new_beat`, processing every pattern over the same range
    /// in registration order. Returns the number of master pulses crossed.
    fn advance_to(&mut self, new_beat: f64, bpm: f64) -> u32 {
        let start = self.last_beat;
        if new_beat <= start {
            return 0;
        }

        for pattern in &self.patterns {
            if let Ok(mut p) = pattern.lock() {
                p.process(start, new_beat, bpm);
            }
        }
        self.last_beat = new_beat;

        let mut pulses = 0;
        if self.clock_mode == ClockMode::Both {
            while new_beat >= self.next_pulse_beat {
                pulses += 1;
                self.next_pulse_beat += 1.0 / PULSES_PER_BEAT;
            }
        }
        pulses
    }

    /// Re-anchor the frame-to-beat conversion at the current beat. Required
    /// after any tempo change or teleport.
    fn rebase_audio(&mut self) {
        self.audio_frames = 0;
        self.audio_anchor_beat = self.last_beat;
    }
}

/// Drives patterns against the beat clock with a selectable precision
/// strategy. See the module comment.
pub struct Sequencer {
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    tick_mode: TickMode,
    jitter_threshold_ms: f64,
    events: EventHub<SequencerEvent>,
    tick_thread: Option<JoinHandle<()>>,
}

impl Sequencer {
    pub fn new(bpm: f64, tick_mode: TickMode, jitter_threshold_ms: f64) -> Self {
        let now = Instant::now();
        Self {
            inner: Arc::new(Mutex::new(Inner {
                clock: TransportClock::new(bpm, now),
                patterns: Vec::new(),
                last_beat: 0.0,
                jitter: JitterStats::default(),
                clock_mode: ClockMode::Internal,
                external: ExternalSync {
                    last_pulse: None,
                    effective_bpm: 0.0,
                    running: false,
                },
                next_pulse_beat: 0.0,
                audio_frames: 0,
                audio_anchor_beat: 0.0,
            })),
            running: Arc::new(AtomicBool::new(false)),
            tick_mode,
            jitter_threshold_ms,
            events: EventHub::new(),
            tick_thread: None,
        }
    }

    pub fn events(&self) -> &EventHub<SequencerEvent> {
        &self.events
    }

    pub fn tick_mode(&self) -> TickMode {
        self.tick_mode
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn add_pattern(&self, pattern: Arc<Mutex<Pattern>>) {
        self.lock_inner().patterns.push(pattern);
        self.events.emit(&SequencerEvent::PatternAdded);
    }

    /// Detach a pattern, silencing anything it still has sounding.
    pub fn remove_pattern(&self, pattern: &Arc<Mutex<Pattern>>) {
        let mut inner = self.lock_inner();
        let before = inner.patterns.len();
        inner.patterns.retain(|p| !Arc::ptr_eq(p, pattern));
        if inner.patterns.len() < before {
            drop(inner);
            if let Ok(mut p) = pattern.lock() {
                p.stop();
            }
        }
    }

    pub fn pattern_count(&self) -> usize {
        self.lock_inner().patterns.len()
    }

    pub fn bpm(&self) -> f64 {
        self.lock_inner().clock.bpm()
    }

    /// Tempo as observed: the smoothed external tempo when synced to an
    /// incoming clock, the internal setting otherwise.
    pub fn effective_bpm(&self) -> f64 {
        let inner = self.lock_inner();
        match inner.clock_mode {
            ClockMode::External if inner.external.effective_bpm > 0.0 => {
                inner.external.effective_bpm
            }
            _ => inner.clock.bpm(),
        }
    }

    pub fn current_beat(&self) -> f64 {
        let inner = self.lock_inner();
        if inner.clock.is_running() {
            inner.clock.current_beat(Instant::now())
        } else {
            inner.last_beat
        }
    }

    pub fn average_jitter_ms(&self) -> f64 {
        self.lock_inner().jitter.average_ms
    }

    pub fn set_clock_mode(&self, mode: ClockMode) {
        let mut inner = self.lock_inner();
        inner.clock_mode = mode;
        inner.next_pulse_beat = inner.last_beat;
        inner.rebase_audio();
    }

    pub fn clock_mode(&self) -> ClockMode {
        self.lock_inner().clock_mode
    }

    /// Clamp and change tempo; the beat position stays continuous across
    /// the change.
    pub fn set_bpm(&self, bpm: f64) {
        {
            let mut inner = self.lock_inner();
            let now = Instant::now();
            inner.clock.set_bpm(bpm, now);
            if inner.clock.is_running() {
                inner.last_beat = inner.clock.current_beat(now);
            }
            inner.rebase_audio();
        }
        self.events.emit(&SequencerEvent::BpmChanged { bpm: self.bpm() });
    }

    /// Teleport by `delta` beats without firing anything the jump crosses.
    pub fn skip(&self, delta: f64) {
        let mut inner = self.lock_inner();
        let now = Instant::now();
        inner.clock.skip(delta, now);
        inner.last_beat = inner.clock.current_beat(now);
        inner.next_pulse_beat = inner.last_beat;
        inner.rebase_audio();
    }

    /// Transition to Running and begin ticking. A no-op when already
    /// running.
    pub fn start(&mut self) {
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        {
            let mut inner = self.lock_inner();
            let now = Instant::now();
            inner.jitter.reset();
            inner.next_pulse_beat = inner.last_beat;
            if self.tick_mode != TickMode::AudioRate {
                inner.clock.start(now);
                inner.last_beat = inner.clock.current_beat(now);
            }
            inner.rebase_audio();
        }

        if matches!(self.tick_mode, TickMode::Standard | TickMode::HighPrecision) {
            let inner = Arc::clone(&self.inner);
            let running = Arc::clone(&self.running);
            let events = self.events.clone();
            let threshold = self.jitter_threshold_ms;
            let interval = match self.tick_mode {
                TickMode::Standard => STANDARD_INTERVAL,
                _ => HIGH_PRECISION_INTERVAL,
            };
            let spin = self.tick_mode == TickMode::HighPrecision;

            self.tick_thread = Some(thread::spawn(move || {
                tick_loop(inner, running, events, interval, spin, threshold);
            }));
        }

        self.events.emit(&SequencerEvent::PlaybackStarted);
    }

    /// Transition to Stopped. Joins the tick thread first, so no pattern
    /// receives a `process` call after this returns; then silences every
    /// pattern.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(handle) = self.tick_thread.take() {
            let _ = handle.join();
        }

        {
            let mut inner = self.lock_inner();
            let now = Instant::now();
            inner.clock.stop(now);
            inner.last_beat = inner.clock.current_beat(now);
            inner.rebase_audio();
            for pattern in &inner.patterns {
                if let Ok(mut p) = pattern.lock() {
                    p.stop();
                }
            }
        }

        self.events.emit(&SequencerEvent::PlaybackStopped);
    }

    /// AudioRate entry point: the audio callback reports a rendered buffer
    /// and the beat advances by exactly that much audio time.
    pub fn advance_audio(&self, frames: usize, sample_rate: f32) {
        if !self.running.load(Ordering::Acquire) || self.tick_mode != TickMode::AudioRate {
            return;
        }

        let pulses = {
            let mut inner = self.lock_inner();
            if inner.clock_mode == ClockMode::External {
                return;
            }
            let bpm = inner.clock.bpm();
            // Beat from the frame total since the last anchor, so block
            // boundaries land exactly where the frame count says they do.
            inner.audio_frames += frames as u64;
            let new_beat = inner.audio_anchor_beat
                + inner.audio_frames as f64 / sample_rate as f64 * bpm / 60.0;
            inner.clock.set_beat(new_beat, Instant::now());
            inner.advance_to(new_beat, bpm)
        };

        for _ in 0..pulses {
            self.events.emit(&SequencerEvent::ClockPulse);
        }
    }

    /// One incoming 24 PPQN clock pulse from an external source. Advances
    /// the beat only when externally clocked; as master (`Internal` or
    /// `Both`) incoming pulses are discarded.
    pub fn clock_pulse(&self) {
        let now = Instant::now();
        let mut inner = self.lock_inner();
        if inner.clock_mode != ClockMode::External || !inner.external.running {
            return;
        }

        if let Some(prev) = inner.external.last_pulse {
            let dt = now.saturating_duration_since(prev).as_secs_f64();
            if dt > 0.0 {
                let instant_bpm = 60.0 / (dt * PULSES_PER_BEAT);
                inner.external.effective_bpm = if inner.external.effective_bpm > 0.0 {
                    inner.external.effective_bpm * 0.8 + instant_bpm * 0.2
                } else {
                    instant_bpm
                };
            }
        }
        inner.external.last_pulse = Some(now);

        let bpm = if inner.external.effective_bpm > 0.0 {
            inner.external.effective_bpm
        } else {
            inner.clock.bpm()
        };
        let new_beat = inner.last_beat + 1.0 / PULSES_PER_BEAT;
        inner.clock.set_beat(new_beat, now);
        inner.advance_to(new_beat, bpm);
    }

    /// External transport Start: rewind to beat zero and run. As master
    /// (`Both`) this kicks off the internal driver, so a synced device can
    /// start playback remotely.
    pub fn clock_start(&mut self) {
        let mode = {
            let mut inner = self.lock_inner();
            if inner.clock_mode == ClockMode::Internal {
                return;
            }
            inner.last_beat = 0.0;
            inner.next_pulse_beat = 0.0;
            inner.clock.set_beat(0.0, Instant::now());
            inner.rebase_audio();
            inner.external.running = true;
            inner.external.last_pulse = None;
            inner.clock_mode
        };

        if mode == ClockMode::External {
            self.running.store(true, Ordering::Release);
            self.events.emit(&SequencerEvent::PlaybackStarted);
        } else {
            self.start();
        }
    }

    /// External transport Continue: resume from the current position.
    pub fn clock_continue(&mut self) {
        let mode = {
            let mut inner = self.lock_inner();
            if inner.clock_mode == ClockMode::Internal {
                return;
            }
            inner.external.running = true;
            inner.external.last_pulse = None;
            inner.rebase_audio();
            inner.clock_mode
        };

        if mode == ClockMode::External {
            self.running.store(true, Ordering::Release);
            self.events.emit(&SequencerEvent::PlaybackStarted);
        } else {
            self.start();
        }
    }

    /// External transport Stop: freeze and silence patterns. As master this
    /// is a full `stop`, tick thread included.
    pub fn clock_stop(&mut self) {
        let mode = {
            let mut inner = self.lock_inner();
            if inner.clock_mode == ClockMode::Internal {
                return;
            }
            inner.external.running = false;
            inner.clock_mode
        };

        if mode == ClockMode::External {
            self.running.store(false, Ordering::Release);
            let inner = self.lock_inner();
            for pattern in &inner.patterns {
                if let Ok(mut p) = pattern.lock() {
                    p.stop();
                }
            }
            drop(inner);
            self.events.emit(&SequencerEvent::PlaybackStopped);
        } else {
            self.stop();
        }
    }

    /// Song position pointer: one unit = one sixteenth note. A teleport,
    /// not a scrub.
    pub fn song_position(&self, position: u16) {
        let beat = position as f64 * 0.25;
        let mut inner = self.lock_inner();
        if inner.clock_mode == ClockMode::Internal {
            return;
        }
        inner.last_beat = beat;
        inner.next_pulse_beat = beat;
        inner.clock.set_beat(beat, Instant::now());
        inner.rebase_audio();
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("sequencer state poisoned")
    }
}

impl Drop for Sequencer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick_loop(
    inner: Arc<Mutex<Inner>>,
    running: Arc<AtomicBool>,
    events: EventHub<SequencerEvent>,
    interval: Duration,
    spin: bool,
    jitter_threshold_ms: f64,
) {
    let mut expected_wake = Instant::now() + interval;

    while running.load(Ordering::Acquire) {
        if spin {
            if interval > SPIN_MARGIN {
                thread::sleep(interval - SPIN_MARGIN);
            }
            while Instant::now() < expected_wake {
                std::hint::spin_loop();
            }
        } else {
            thread::sleep(interval);
        }

        let now = Instant::now();
        let error_ms = if now >= expected_wake {
            now.duration_since(expected_wake).as_secs_f64() * 1000.0
        } else {
            expected_wake.duration_since(now).as_secs_f64() * 1000.0
        };
        expected_wake = now + interval;

        let mut jitter_event = None;
        let mut pulses = 0;
        {
            let mut guard = match inner.lock() {
                Ok(guard) => guard,
                Err(_) => break,
            };

            if guard.jitter.record(error_ms, jitter_threshold_ms) {
                jitter_event = Some(SequencerEvent::TimingJitterDetected {
                    average_ms: guard.jitter.average_ms,
                });
            }

            // Externally clocked: pulses advance the beat, the timer only
            // keeps jitter statistics alive.
            if guard.clock_mode != ClockMode::External {
                let bpm = guard.clock.bpm();
                let new_beat = guard.clock.current_beat(now);
                pulses = guard.advance_to(new_beat, bpm);
            }
        }

        if let Some(event) = jitter_event {
            events.emit(&event);
        }
        for _ in 0..pulses {
            events.emit(&SequencerEvent::ClockPulse);
        }
    }
}
