//! demo - plays a looping pattern through the default output device
//!
//! Run with: cargo run --bin demo

use std::f32::consts::TAU;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use color_eyre::Result;

use ostinato::{
    config::EngineConfig,
    engine::AudioEngine,
    graph::node::Instrument,
    sequencing::{Pattern, TickMode},
    voice::VoiceProgram,
};

const SAMPLE_RATE: f32 = 48_000.0;

/// Sine pluck: fixed pitch per trigger, exponential decay, releases early
/// on note-off.
struct Pluck {
    phase: f32,
    step: f32,
    amp: f32,
    decay: f32,
}

impl Pluck {
    fn new() -> Self {
        Self {
            phase: 0.0,
            step: 0.0,
            amp: 0.0,
            decay: 0.9995,
        }
    }
}

impl VoiceProgram for Pluck {
    fn trigger(&mut self, note: u8, velocity: u8) {
        let freq = 440.0 * 2f32.powf((note as f32 - 69.0) / 12.0);
        self.step = freq * TAU / SAMPLE_RATE;
        self.phase = 0.0;
        self.amp = velocity as f32 / 127.0 * 0.4;
        self.decay = 0.9998;
    }

    fn release(&mut self) {
        self.decay = 0.999;
    }

    fn render(&mut self, out: &mut [f32]) {
        for s in out.iter_mut() {
            *s += self.phase.sin() * self.amp;
            self.phase = (self.phase + self.step) % TAU;
            self.amp *= self.decay;
        }
    }

    fn is_active(&self) -> bool {
        self.amp > 1e-4
    }

    fn amplitude(&self) -> f32 {
        self.amp
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let config = EngineConfig::default()
        .with_sample_rate(SAMPLE_RATE)
        .with_bpm(120.0)
        .with_max_voices(8)
        .with_tick_mode(TickMode::AudioRate);
    let mut engine = AudioEngine::new(config);

    let (controller, _channel) = engine.add_instrument(&Pluck::new, vec!["cutoff".into()], 0.8)?;

    let target: Arc<dyn Instrument> = Arc::new(controller);

    // A I-V-vi-IV arpeggio over a four beat loop.
    let mut melody = Pattern::new(Arc::downgrade(&target));
    melody
        .add_note(60, 0.0, 0.5, 110)?
        .add_note(67, 0.5, 0.5, 90)?
        .add_note(69, 1.0, 0.5, 95)?
        .add_note(65, 1.5, 0.5, 90)?
        .add_note(64, 2.0, 0.5, 100)?
        .add_note(67, 2.5, 0.5, 85)?
        .add_note(72, 3.0, 1.0, 105)?;
    engine.add_pattern(Arc::new(Mutex::new(melody)));

    let mut bass = Pattern::new(Arc::downgrade(&target));
    bass.add_note(36, 0.0, 1.0, 120)?.add_note(43, 2.0, 1.0, 110)?;
    engine.add_pattern(Arc::new(Mutex::new(bass)));

    println!("=== ostinato demo ===");
    println!("120 bpm, four beat loop. Ctrl+C to stop.");

    engine.start()?;

    loop {
        std::thread::sleep(Duration::from_millis(100));
    }
}
