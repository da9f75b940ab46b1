pub mod config;
pub mod engine; // Composition root and device lifecycle
pub mod error;
pub mod events;
pub mod graph; // Pull-based audio graph: nodes, effect chains, mixer
pub mod midi; // Message parsing and device-to-instrument routing
pub mod sequencing; // Musical timing, patterns, transport
pub mod synth; // Control-thread to audio-thread instrument plumbing
pub mod voice; // Polyphonic voice allocation

pub const MAX_BLOCK_SIZE: usize = 2048;
