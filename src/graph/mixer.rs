use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::{
    error::EngineError,
    graph::{
        chain::EffectChain,
        node::{AudioNode, StreamFormat},
        resample::Resampler,
    },
    MAX_BLOCK_SIZE,
};

/*
Mixer
=====

The mixer sums every enabled channel into one interleaved output stream at a
fixed operating format. `read` is the only method the audio thread calls;
everything it touches is preallocated, and control-thread writes arrive
through atomics so a gain change lands on the NEXT read, never mid-buffer.

Channel layout is a fixed-capacity arena. A `ChannelHandle` is an index plus
a shared atomic control block:

  gain      f32 bits in an AtomicU32, lock-free from any thread
  muted     channel renders but is excluded from the sum
  enabled   channel is skipped entirely (also how faulted channels are
            quarantined)

Removal is deferred: the caller takes the node out under the mixer lock
(excluded from the next read) and the box drops on the control thread, never
inside the audio callback.

Fault isolation: a channel that panics while rendering is caught, silenced
for the buffer, and disabled. One broken instrument must not take down the
rest of the mix (or the stream - an unwind across the audio callback is
fatal).

The summed output passes through master gain and a tanh soft clip, so
stacking full-scale sources saturates smoothly instead of hard-wrapping.
*/

const MAX_MIXER_CHANNELS: usize = 32;

fn f32_to_bits(v: f32) -> u32 {
    v.to_bits()
}

fn f32_from_bits(b: u32) -> f32 {
    f32::from_bits(b)
}

/// Atomic per-channel state shared between the mixer and its handle.
pub struct ChannelControls {
    gain_bits: AtomicU32,
    muted: AtomicBool,
    enabled: AtomicBool,
}

impl ChannelControls {
    fn new(gain: f32) -> Self {
        Self {
            gain_bits: AtomicU32::new(f32_to_bits(gain.max(0.0))),
            muted: AtomicBool::new(false),
            enabled: AtomicBool::new(true),
        }
    }

    fn gain(&self) -> f32 {
        f32_from_bits(self.gain_bits.load(Ordering::Relaxed))
    }
}

/// Control-thread view of one mixer channel. Safe to use while the audio
/// thread is inside `read`; changes apply on the next read.
#[derive(Clone)]
pub struct ChannelHandle {
    index: usize,
    controls: Arc<ChannelControls>,
}

impl ChannelHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set_gain(&self, gain: f32) {
        self.controls
            .gain_bits
            .store(f32_to_bits(gain.max(0.0)), Ordering::Relaxed);
    }

    pub fn gain(&self) -> f32 {
        self.controls.gain()
    }

    pub fn set_muted(&self, muted: bool) {
        self.controls.muted.store(muted, Ordering::Relaxed);
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.controls.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.controls.enabled.load(Ordering::Relaxed)
    }
}

struct ChannelSlot {
    chain: Option<EffectChain>,
    controls: Arc<ChannelControls>,
}

/// Sums many sources into one interleaved stream with gain staging and a
/// soft-clipped master bus.
pub struct Mixer {
    format: StreamFormat,
    slots: Vec<ChannelSlot>,
    master_gain_bits: AtomicU32,
    scratch: Vec<f32>,
}

impl Mixer {
    pub fn new(format: StreamFormat) -> Self {
        let slots = (0..MAX_MIXER_CHANNELS)
            .map(|_| ChannelSlot {
                chain: None,
                controls: Arc::new(ChannelControls::new(1.0)),
            })
            .collect();

        Self {
            format,
            slots,
            master_gain_bits: AtomicU32::new(f32_to_bits(1.0)),
            scratch: vec![0.0; MAX_BLOCK_SIZE * format.channels],
        }
    }

    pub fn format(&self) -> StreamFormat {
        self.format
    }

    /// Add a source to the first free channel slot.
    ///
    /// Sources running at a different native rate get a resampling adapter
    /// so the mixer always pulls at its own operating rate. Sources must
    /// match the mixer's channel count.
    pub fn add_source(
        &mut self,
        node: Box<dyn AudioNode>,
        initial_gain: f32,
    ) -> Result<ChannelHandle, EngineError> {
        let node: Box<dyn AudioNode> = if node.format().sample_rate != self.format.sample_rate {
            Box::new(Resampler::new(node, self.format.sample_rate))
        } else {
            node
        };

        let slot_idx = self
            .slots
            .iter()
            .position(|s| s.chain.is_none())
            .ok_or(EngineError::MixerFull {
                capacity: MAX_MIXER_CHANNELS,
            })?;

        let controls = Arc::new(ChannelControls::new(initial_gain));
        self.slots[slot_idx] = ChannelSlot {
            chain: Some(EffectChain::new(node)),
            controls: Arc::clone(&controls),
        };

        Ok(ChannelHandle {
            index: slot_idx,
            controls,
        })
    }

    /// Detach a channel. The returned chain (and its node) drop on the
    /// caller's thread; the slot is free for reuse immediately.
    pub fn remove_source(&mut self, handle: &ChannelHandle) -> Option<EffectChain> {
        handle.set_enabled(false);
        self.slots.get_mut(handle.index)?.chain.take()
    }

    /// Mutable access to a channel's effect chain for inserting, reordering
    /// or retuning effects. Restructuring happens while the caller holds the
    /// mixer, so a concurrent `read` sees either the old or new chain.
    pub fn chain_mut(&mut self, handle: &ChannelHandle) -> Option<&mut EffectChain> {
        self.slots.get_mut(handle.index)?.chain.as_mut()
    }

    pub fn set_channel_gain(&self, index: usize, gain: f32) {
        if let Some(slot) = self.slots.get(index) {
            slot.controls
                .gain_bits
                .store(f32_to_bits(gain.max(0.0)), Ordering::Relaxed);
        }
    }

    pub fn set_all_channels_gain(&self, gain: f32) {
        for slot in &self.slots {
            slot.controls
                .gain_bits
                .store(f32_to_bits(gain.max(0.0)), Ordering::Relaxed);
        }
    }

    pub fn set_master_gain(&self, gain: f32) {
        self.master_gain_bits
            .store(f32_to_bits(gain.max(0.0)), Ordering::Relaxed);
    }

    pub fn master_gain(&self) -> f32 {
        f32_from_bits(self.master_gain_bits.load(Ordering::Relaxed))
    }

    pub fn active_channels(&self) -> usize {
        self.slots.iter().filter(|s| s.chain.is_some()).count()
    }

    /// Pull one block from every enabled channel and sum into `out`.
    ///
    /// Audio-thread entry point: allocation-free, bounded work per channel,
    /// and any channel that unwinds is silenced and quarantined.
    pub fn read(&mut self, out: &mut [f32]) -> usize {
        let channels = self.format.channels;
        let frames = (out.len() / channels).min(MAX_BLOCK_SIZE);
        let samples = frames * channels;

        out[..samples].fill(0.0);

        for slot in &mut self.slots {
            let enabled = slot.controls.enabled.load(Ordering::Relaxed);
            let muted = slot.controls.muted.load(Ordering::Relaxed);
            let gain = slot.controls.gain();

            let Some(chain) = slot.chain.as_mut() else {
                continue;
            };
            if !enabled {
                continue;
            }

            let scratch = &mut self.scratch[..samples];
            scratch.fill(0.0);

            let result = catch_unwind(AssertUnwindSafe(|| chain.read(scratch)));
            match result {
                Ok(_) => {
                    if muted {
                        continue;
                    }
                    for (o, &s) in out[..samples].iter_mut().zip(self.scratch.iter()) {
                        // A node emitting NaN/inf would poison the whole sum.
                        if s.is_finite() {
                            *o += s * gain;
                        }
                    }
                }
                Err(_) => {
                    // Quarantine: silence this buffer and skip the channel on
                    // future reads until a control thread re-enables it.
                    slot.controls.enabled.store(false, Ordering::Relaxed);
                    tracing::warn!("mixer channel faulted while rendering; disabled");
                }
            }
        }

        let master = self.master_gain();
        for s in out[..samples].iter_mut() {
            *s = (*s * master).tanh();
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dc {
        value: f32,
        rate: f32,
    }

    impl Dc {
        fn new(value: f32) -> Self {
            Self {
                value,
                rate: 48_000.0,
            }
        }
    }

    impl AudioNode for Dc {
        fn format(&self) -> StreamFormat {
            StreamFormat::mono(self.rate)
        }

        fn read(&mut self, out: &mut [f32]) -> usize {
            out.fill(self.value);
            out.len()
        }
    }

    struct Panics;

    impl AudioNode for Panics {
        fn format(&self) -> StreamFormat {
            StreamFormat::mono(48_000.0)
        }

        fn read(&mut self, _out: &mut [f32]) -> usize {
            panic!("broken node");
        }
    }

    fn mono_mixer() -> Mixer {
        Mixer::new(StreamFormat::mono(48_000.0))
    }

    #[test]
    fn empty_mixer_outputs_silence() {
        let mut mixer = mono_mixer();
        let mut buf = [1.0f32; 16];
        assert_eq!(mixer.read(&mut buf), 16);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn sums_channels_with_gain() {
        let mut mixer = mono_mixer();
        mixer.add_source(Box::new(Dc::new(0.1)), 1.0).unwrap();
        mixer.add_source(Box::new(Dc::new(0.1)), 2.0).unwrap();

        let mut buf = [0.0f32; 8];
        mixer.read(&mut buf);

        // 0.1 + 0.2 = 0.3, then tanh
        let expected = 0.3f32.tanh();
        assert!(buf.iter().all(|&s| (s - expected).abs() < 1e-6));
    }

    #[test]
    fn gain_change_applies_on_next_read() {
        let mut mixer = mono_mixer();
        let handle = mixer.add_source(Box::new(Dc::new(0.2)), 1.0).unwrap();

        let mut buf = [0.0f32; 4];
        mixer.read(&mut buf);
        let before = buf[0];

        handle.set_gain(0.5);
        mixer.read(&mut buf);
        let after = buf[0];

        assert!((before - 0.2f32.tanh()).abs() < 1e-6);
        assert!((after - 0.1f32.tanh()).abs() < 1e-6);
    }

    #[test]
    fn repeated_gain_set_is_idempotent() {
        let mut mixer = mono_mixer();
        let handle = mixer.add_source(Box::new(Dc::new(0.4)), 1.0).unwrap();

        handle.set_gain(0.5);
        let mut once = [0.0f32; 4];
        mixer.read(&mut once);

        handle.set_gain(0.5);
        handle.set_gain(0.5);
        let mut twice = [0.0f32; 4];
        mixer.read(&mut twice);

        assert_eq!(once, twice);
    }

    #[test]
    fn soft_clip_is_bounded_and_monotonic() {
        // Stack increasingly many full-scale sources; output must grow
        // monotonically and never exceed 1.0 in magnitude.
        let mut previous = 0.0f32;
        for n in 1..=8 {
            let mut mixer = mono_mixer();
            for _ in 0..n {
                mixer.add_source(Box::new(Dc::new(1.0)), 1.0).unwrap();
            }
            let mut buf = [0.0f32; 4];
            mixer.read(&mut buf);

            assert!(buf[0] <= 1.0, "output {} exceeded full scale", buf[0]);
            assert!(
                buf[0] >= previous,
                "output not monotonic: {} < {}",
                buf[0],
                previous
            );
            previous = buf[0];
        }
    }

    #[test]
    fn muted_channel_is_excluded() {
        let mut mixer = mono_mixer();
        let handle = mixer.add_source(Box::new(Dc::new(0.5)), 1.0).unwrap();
        handle.set_muted(true);

        let mut buf = [0.0f32; 4];
        mixer.read(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn removed_channel_frees_its_slot() {
        let mut mixer = mono_mixer();
        let handle = mixer.add_source(Box::new(Dc::new(0.5)), 1.0).unwrap();
        assert_eq!(mixer.active_channels(), 1);

        let chain = mixer.remove_source(&handle);
        assert!(chain.is_some());
        assert_eq!(mixer.active_channels(), 0);

        let mut buf = [0.0f32; 4];
        mixer.read(&mut buf);
        assert!(buf.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn faulting_channel_is_quarantined_not_fatal() {
        let mut mixer = mono_mixer();
        mixer.add_source(Box::new(Dc::new(0.1)), 1.0).unwrap();
        let bad = mixer.add_source(Box::new(Panics), 1.0).unwrap();

        let mut buf = [0.0f32; 4];
        mixer.read(&mut buf);

        // Healthy channel still audible, faulted one disabled.
        assert!(buf.iter().all(|&s| (s - 0.1f32.tanh()).abs() < 1e-6));
        assert!(!bad.is_enabled());
    }

    #[test]
    fn mismatched_rate_source_gets_resampled() {
        let mut mixer = mono_mixer();
        let source = Dc {
            value: 0.25,
            rate: 96_000.0,
        };
        mixer.add_source(Box::new(source), 1.0).unwrap();

        let mut buf = [0.0f32; 8];
        mixer.read(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.25f32.tanh()).abs() < 1e-4));
    }

    #[test]
    fn arena_capacity_is_enforced() {
        let mut mixer = mono_mixer();
        for _ in 0..MAX_MIXER_CHANNELS {
            mixer.add_source(Box::new(Dc::new(0.0)), 1.0).unwrap();
        }
        let overflow = mixer.add_source(Box::new(Dc::new(0.0)), 1.0);
        assert!(matches!(overflow, Err(EngineError::MixerFull { .. })));
    }
}
