use crate::{
    graph::node::{AudioNode, Effect, StreamFormat},
    MAX_BLOCK_SIZE,
};

/*
Effect Chains
=============

An EffectChain wraps a source node with an ordered list of effect stages.
Each stage owns an effect plus the two knobs the chain applies around it:

  enabled   Bypass flag. A disabled stage passes audio through untouched.
  mix       Dry/wet blend in [0, 1], applied AFTER the effect processes:
            out = dry * (1 - mix) + wet * mix

Processing order is stage order. Reordering or inserting stages swaps the
stage list in one step, so a concurrent `read` (which happens under the
mixer's channel lock) either sees the old chain or the new one, never a
half-rebuilt linkage.

The dry scratch buffer is allocated once at construction and reused, keeping
`read` allocation-free on the audio thread.
*/

/// One effect plus its bypass and wet/dry state.
pub struct EffectStage {
    effect: Box<dyn Effect>,
    enabled: bool,
    mix: f32,
}

impl EffectStage {
    pub fn new(effect: Box<dyn Effect>) -> Self {
        Self {
            effect,
            enabled: true,
            mix: 1.0,
        }
    }

    pub fn with_mix(mut self, mix: f32) -> Self {
        self.mix = mix.clamp(0.0, 1.0);
        self
    }
}

/// An ordered list of effects over a source node.
pub struct EffectChain {
    source: Box<dyn AudioNode>,
    stages: Vec<EffectStage>,
    dry_scratch: Vec<f32>,
}

impl EffectChain {
    pub fn new(source: Box<dyn AudioNode>) -> Self {
        let channels = source.format().channels;
        Self {
            source,
            stages: Vec::new(),
            dry_scratch: vec![0.0; MAX_BLOCK_SIZE * channels],
        }
    }

    /// Append an effect at the end of the chain (fully wet, enabled).
    pub fn push(&mut self, effect: Box<dyn Effect>) -> usize {
        self.stages.push(EffectStage::new(effect));
        self.stages.len() - 1
    }

    /// Insert an effect at `index`, shifting later stages down.
    pub fn insert(&mut self, index: usize, effect: Box<dyn Effect>) {
        let index = index.min(self.stages.len());
        self.stages.insert(index, EffectStage::new(effect));
    }

    /// Remove the stage at `index`. Out-of-range indices are a no-op.
    pub fn remove(&mut self, index: usize) -> Option<Box<dyn Effect>> {
        if index < self.stages.len() {
            Some(self.stages.remove(index).effect)
        } else {
            None
        }
    }

    /// Move the stage at `from` to position `to`, rebuilding the order in
    /// one step.
    pub fn reorder(&mut self, from: usize, to: usize) {
        if from < self.stages.len() && to < self.stages.len() && from != to {
            let stage = self.stages.remove(from);
            self.stages.insert(to, stage);
        }
    }

    pub fn set_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.enabled = enabled;
        }
    }

    pub fn set_mix(&mut self, index: usize, mix: f32) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.mix = mix.clamp(0.0, 1.0);
        }
    }

    pub fn set_stage_parameter(&mut self, index: usize, name: &str, value: f32) {
        if let Some(stage) = self.stages.get_mut(index) {
            stage.effect.set_parameter(name, value);
        }
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn source_mut(&mut self) -> &mut dyn AudioNode {
        &mut *self.source
    }
}

impl AudioNode for EffectChain {
    fn format(&self) -> StreamFormat {
        self.source.format()
    }

    fn read(&mut self, out: &mut [f32]) -> usize {
        let frames = self.source.read(out);
        let channels = self.source.format().channels;
        let samples = frames * channels;

        for stage in &mut self.stages {
            if !stage.enabled {
                continue;
            }

            let dry = &mut self.dry_scratch[..samples];
            dry.copy_from_slice(&out[..samples]);

            stage.effect.process(&mut out[..samples], frames);

            let mix = stage.mix;
            if mix < 1.0 {
                for (o, &d) in out[..samples].iter_mut().zip(dry.iter()) {
                    *o = d * (1.0 - mix) + *o * mix;
                }
            }
        }

        frames
    }

    fn is_active(&self) -> bool {
        self.source.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dc(f32);

    impl AudioNode for Dc {
        fn format(&self) -> StreamFormat {
            StreamFormat::mono(48_000.0)
        }

        fn read(&mut self, out: &mut [f32]) -> usize {
            out.fill(self.0);
            out.len()
        }
    }

    struct Gain(f32);

    impl Effect for Gain {
        fn process(&mut self, io: &mut [f32], _frames: usize) {
            for s in io.iter_mut() {
                *s *= self.0;
            }
        }
    }

    #[test]
    fn empty_chain_passes_source_through() {
        let mut chain = EffectChain::new(Box::new(Dc(0.25)));
        let mut buf = [0.0f32; 16];
        assert_eq!(chain.read(&mut buf), 16);
        assert!(buf.iter().all(|&s| s == 0.25));
    }

    #[test]
    fn stages_apply_in_order() {
        let mut chain = EffectChain::new(Box::new(Dc(1.0)));
        chain.push(Box::new(Gain(0.5)));
        chain.push(Box::new(Gain(0.5)));

        let mut buf = [0.0f32; 8];
        chain.read(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }

    #[test]
    fn bypass_passes_through() {
        let mut chain = EffectChain::new(Box::new(Dc(1.0)));
        let idx = chain.push(Box::new(Gain(0.0)));
        chain.set_enabled(idx, false);

        let mut buf = [0.0f32; 8];
        chain.read(&mut buf);
        assert!(buf.iter().all(|&s| s == 1.0));
    }

    #[test]
    fn half_mix_blends_dry_and_wet() {
        let mut chain = EffectChain::new(Box::new(Dc(1.0)));
        let idx = chain.push(Box::new(Gain(0.0)));
        chain.set_mix(idx, 0.5);

        // dry = 1.0, wet = 0.0, 50/50 blend = 0.5
        let mut buf = [0.0f32; 8];
        chain.read(&mut buf);
        assert!(buf.iter().all(|&s| (s - 0.5).abs() < 1e-6));
    }

    #[test]
    fn remove_and_reorder() {
        let mut chain = EffectChain::new(Box::new(Dc(1.0)));
        chain.push(Box::new(Gain(0.5)));
        chain.push(Box::new(Gain(0.25)));
        assert_eq!(chain.len(), 2);

        chain.reorder(0, 1);
        assert_eq!(chain.len(), 2);

        assert!(chain.remove(1).is_some());
        assert_eq!(chain.len(), 1);
        assert!(chain.remove(5).is_none());

        let mut buf = [0.0f32; 4];
        chain.read(&mut buf);
        // Only the 0.25 gain remains after the reorder+remove.
        assert!(buf.iter().all(|&s| (s - 0.25).abs() < 1e-6));
    }
}
