//! Engine configuration.
//!
//! One `EngineConfig` is created at engine construction and threaded through
//! every component. Nothing in the crate reads process-wide mutable settings.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::sequencing::sequencer::TickMode;
use crate::voice::StealPolicy;

/// Configuration for the whole engine, fixed at construction time.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Operating sample rate in Hz. Sources at other rates get a resampling
    /// adapter when added to the mixer.
    pub sample_rate: f32,
    /// Interleaved output channel count.
    pub channels: usize,
    /// Largest block the engine will render in one pass.
    pub max_block_size: usize,
    /// Initial tempo in beats per minute (clamped to >= 1.0).
    pub bpm: f64,
    /// Scheduling strategy for the sequencer.
    pub tick_mode: TickMode,
    /// Default polyphony for instruments built through the engine.
    pub max_voices: usize,
    /// Default voice stealing policy.
    pub steal_policy: StealPolicy,
    /// Jitter threshold in milliseconds above which the sequencer emits a
    /// diagnostic event.
    pub jitter_threshold_ms: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            channels: 2,
            max_block_size: crate::MAX_BLOCK_SIZE,
            bpm: 120.0,
            tick_mode: TickMode::Standard,
            max_voices: 16,
            steal_policy: StealPolicy::Oldest,
            jitter_threshold_ms: 2.0,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(mut self, sample_rate: f32) -> Self {
        self.sample_rate = sample_rate;
        self
    }

    pub fn with_channels(mut self, channels: usize) -> Self {
        self.channels = channels.max(1);
        self
    }

    pub fn with_bpm(mut self, bpm: f64) -> Self {
        self.bpm = bpm.max(1.0);
        self
    }

    pub fn with_tick_mode(mut self, mode: TickMode) -> Self {
        self.tick_mode = mode;
        self
    }

    pub fn with_max_voices(mut self, max_voices: usize) -> Self {
        self.max_voices = max_voices;
        self
    }

    pub fn with_steal_policy(mut self, policy: StealPolicy) -> Self {
        self.steal_policy = policy;
        self
    }

    pub fn with_max_block_size(mut self, frames: usize) -> Self {
        self.max_block_size = frames.clamp(1, crate::MAX_BLOCK_SIZE);
        self
    }
}
