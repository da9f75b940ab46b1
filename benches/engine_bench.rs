//! Benchmarks for the realtime hot paths.
//!
//! Run with: cargo bench
//!
//! Reference timing at 48kHz sample rate:
//!   - 64 samples  = 1.33ms deadline
//!   - 128 samples = 2.67ms deadline
//!   - 256 samples = 5.33ms deadline
//!   - 512 samples = 10.67ms deadline
//!
//! Two groups: voice-pool rendering (the per-instrument cost) and full
//! mixer reads over multiple channels (the per-callback cost).

use std::hint::black_box;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use ostinato::graph::mixer::Mixer;
use ostinato::graph::node::{AudioNode, StreamFormat};
use ostinato::voice::{StealPolicy, VoicePool, VoiceProgram};

/// Common buffer sizes used in audio applications.
const BLOCK_SIZES: &[usize] = &[64, 128, 256, 512];

/// Naive sawtooth with an exponential decay, enough work per sample to be
/// representative without depending on concrete DSP.
struct SawVoice {
    phase: f32,
    step: f32,
    amp: f32,
    active: bool,
}

impl SawVoice {
    fn new() -> Self {
        Self {
            phase: 0.0,
            step: 0.0,
            amp: 0.0,
            active: false,
        }
    }
}

impl VoiceProgram for SawVoice {
    fn trigger(&mut self, note: u8, velocity: u8) {
        let freq = 440.0 * 2f32.powf((note as f32 - 69.0) / 12.0);
        self.step = freq / 48_000.0;
        self.amp = velocity as f32 / 127.0;
        self.active = true;
    }

    fn release(&mut self) {
        self.active = false;
    }

    fn render(&mut self, out: &mut [f32]) {
        if !self.active {
            return;
        }
        for s in out.iter_mut() {
            *s += (self.phase * 2.0 - 1.0) * self.amp;
            self.phase = (self.phase + self.step).fract();
            self.amp *= 0.99999;
        }
    }

    fn is_active(&self) -> bool {
        self.active
    }

    fn amplitude(&self) -> f32 {
        self.amp
    }
}

struct SawSource {
    pool: VoicePool<SawVoice>,
}

impl AudioNode for SawSource {
    fn format(&self) -> StreamFormat {
        StreamFormat::mono(48_000.0)
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        out.fill(0.0);
        self.pool.render(out);
        out.len()
    }
}

fn full_pool(voices: usize) -> VoicePool<SawVoice> {
    let mut pool = VoicePool::new((0..voices).map(|_| SawVoice::new()).collect(), StealPolicy::Oldest);
    for i in 0..voices {
        pool.note_on(48 + i as u8, 100);
    }
    pool
}

fn bench_voice_pool(c: &mut Criterion) {
    let mut group = c.benchmark_group("voices/pool_render");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        for &voices in &[4usize, 16] {
            let mut pool = full_pool(voices);
            group.bench_with_input(
                BenchmarkId::new(format!("{}_voices", voices), size),
                &size,
                |b, _| {
                    b.iter(|| {
                        buffer.fill(0.0);
                        pool.render(black_box(&mut buffer));
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_mixer_read(c: &mut Criterion) {
    let mut group = c.benchmark_group("mix/read");

    for &size in BLOCK_SIZES {
        let mut buffer = vec![0.0f32; size];

        for &channels in &[2usize, 8] {
            let mut mixer = Mixer::new(StreamFormat::mono(48_000.0));
            for _ in 0..channels {
                let source = SawSource { pool: full_pool(4) };
                mixer.add_source(Box::new(source), 0.8).unwrap();
            }

            group.bench_with_input(
                BenchmarkId::new(format!("{}_channel", channels), size),
                &size,
                |b, _| {
                    b.iter(|| {
                        mixer.read(black_box(&mut buffer));
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_voice_pool, bench_mixer_read);
criterion_main!(benches);
