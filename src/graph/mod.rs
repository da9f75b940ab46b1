//! Pull-based audio graph.
//!
//! Everything that produces sound satisfies the `AudioNode` contract: fill a
//! buffer with interleaved frames on demand at a declared format. Effect
//! chains wrap a source node, the mixer sums many nodes into one output
//! stream, and the resampler reconciles sources that run at a different
//! native rate than the mixer.

/// Ordered effect stages over a source node.
pub mod chain;
/// Channel summing, gain staging, soft clipping.
pub mod mixer;
/// Core traits shared by all graph nodes.
pub mod node;
/// Sample-rate reconciliation adapter.
pub mod resample;

pub use chain::EffectChain;
pub use mixer::{ChannelHandle, Mixer};
pub use node::{AudioNode, Effect, Instrument, StreamFormat};
