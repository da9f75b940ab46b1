use std::sync::{Arc, Mutex};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use crate::{
    config::EngineConfig,
    error::EngineError,
    events::SubscriptionId,
    graph::{
        mixer::{ChannelHandle, Mixer},
        node::{AudioNode, StreamFormat},
    },
    midi::{router::MidiRouter, MidiInputs, MidiMessage},
    sequencing::{
        pattern::Pattern,
        sequencer::{Sequencer, SequencerEvent, TickMode},
    },
    synth::{poly_synth, SynthController},
    voice::VoiceFactory,
    MAX_BLOCK_SIZE,
};

/*
AudioEngine
===========

The composition root. Owns the mixer (shared with the cpal callback through
an Arc<Mutex<_>> with short critical sections), the sequencer, the MIDI
router, and the device lifecycle.

Thread picture:

  audio callback    locks the mixer per block, reads, unlocks. In AudioRate
                    mode it also reports the block to the sequencer so beat
                    advancement is sample-driven.
  tick thread       owned by the sequencer (Standard/HighPrecision).
  midi callbacks    one per device, feed the router; realtime messages are
                    hooked into the sequencer's clock-sync entry points.
  control thread    everything else: mapping, gains, patterns, transport.

Teardown order matters and `dispose` pins it: stop the sequencer (joins the
tick thread, so nothing schedules into a dying graph), stop the audio
stream, unsubscribe event handlers, close MIDI devices, then let the hosted
nodes drop with the mixer. `dispose` is idempotent and Drop calls it.
*/

/// Owns the audio graph, transport, and device lifecycle.
pub struct AudioEngine {
    config: EngineConfig,
    mixer: Arc<Mutex<Mixer>>,
    sequencer: Arc<Mutex<Sequencer>>,
    router: Arc<Mutex<MidiRouter>>,
    midi_inputs: MidiInputs,
    stream: Option<cpal::Stream>,
    transport_subscription: Option<SubscriptionId>,
    disposed: bool,
}

impl AudioEngine {
    pub fn new(config: EngineConfig) -> Self {
        let format = StreamFormat {
            sample_rate: config.sample_rate,
            channels: config.channels,
        };
        let mixer = Arc::new(Mutex::new(Mixer::new(format)));
        let sequencer = Arc::new(Mutex::new(Sequencer::new(
            config.bpm,
            config.tick_mode,
            config.jitter_threshold_ms,
        )));

        // Clock-sync messages from any MIDI device drive the sequencer.
        let mut router = MidiRouter::new();
        let clock_target = Arc::clone(&sequencer);
        router.set_realtime_hook(move |message| {
            let Ok(mut seq) = clock_target.lock() else {
                return;
            };
            match message {
                MidiMessage::Clock => seq.clock_pulse(),
                MidiMessage::Start => seq.clock_start(),
                MidiMessage::Continue => seq.clock_continue(),
                MidiMessage::Stop => seq.clock_stop(),
                MidiMessage::SongPosition { position } => seq.song_position(*position),
                _ => {}
            }
        });

        // Transport diagnostics to the log, subscribed exactly once and
        // unsubscribed on dispose.
        let transport_subscription = sequencer.lock().ok().map(|seq| {
            seq.events().subscribe(|event| match event {
                SequencerEvent::PlaybackStarted => tracing::info!("playback started"),
                SequencerEvent::PlaybackStopped => tracing::info!("playback stopped"),
                SequencerEvent::BpmChanged { bpm } => tracing::info!(bpm, "tempo changed"),
                SequencerEvent::TimingJitterDetected { average_ms } => {
                    tracing::warn!(average_ms, "scheduler jitter above threshold");
                }
                _ => {}
            })
        });

        Self {
            config,
            mixer,
            sequencer,
            router: Arc::new(Mutex::new(router)),
            midi_inputs: MidiInputs::new(),
            stream: None,
            transport_subscription,
            disposed: false,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared sequencer handle, for transport control and pattern setup.
    pub fn sequencer(&self) -> Arc<Mutex<Sequencer>> {
        Arc::clone(&self.sequencer)
    }

    /// Shared router handle, for building MIDI mappings.
    pub fn router(&self) -> Arc<Mutex<MidiRouter>> {
        Arc::clone(&self.router)
    }

    /// Put a source on the mix bus. See [`Mixer::add_source`].
    pub fn add_source(
        &self,
        node: Box<dyn AudioNode>,
        initial_gain: f32,
    ) -> Result<ChannelHandle, EngineError> {
        self.lock_mixer()?.add_source(node, initial_gain)
    }

    /// Build a polyphonic instrument with the configured polyphony and
    /// steal policy at the engine sample rate, and put it on the mix bus.
    /// The controller goes to control code; the handle addresses the
    /// channel.
    pub fn add_instrument<F>(
        &self,
        factory: &F,
        params: Vec<String>,
        initial_gain: f32,
    ) -> Result<(SynthController, ChannelHandle), EngineError>
    where
        F: VoiceFactory,
        F::Voice: 'static,
    {
        let (controller, synth) = poly_synth(
            factory,
            self.config.max_voices,
            self.config.steal_policy,
            params,
            self.config.sample_rate,
        );
        let handle = self.add_source(Box::new(synth), initial_gain)?;
        Ok((controller, handle))
    }

    /// Detach a channel; the node drops here, not in the audio callback.
    pub fn remove_source(&self, handle: &ChannelHandle) {
        if let Ok(mut mixer) = self.mixer.lock() {
            drop(mixer.remove_source(handle));
        }
    }

    pub fn set_master_gain(&self, gain: f32) {
        if let Ok(mixer) = self.mixer.lock() {
            mixer.set_master_gain(gain);
        }
    }

    pub fn set_channel_gain(&self, index: usize, gain: f32) {
        if let Ok(mixer) = self.mixer.lock() {
            mixer.set_channel_gain(index, gain);
        }
    }

    pub fn set_all_channels_gain(&self, gain: f32) {
        if let Ok(mixer) = self.mixer.lock() {
            mixer.set_all_channels_gain(gain);
        }
    }

    /// Run a closure against the mixer under its lock, for effect-chain
    /// edits. Keep it short; the audio callback contends on this lock.
    pub fn with_mixer<R>(&self, f: impl FnOnce(&mut Mixer) -> R) -> Result<R, EngineError> {
        let mut mixer = self.lock_mixer()?;
        Ok(f(&mut mixer))
    }

    pub fn add_pattern(&self, pattern: Arc<Mutex<Pattern>>) {
        if let Ok(seq) = self.sequencer.lock() {
            seq.add_pattern(pattern);
        }
    }

    /// Connect a MIDI input by (partial) name and register it with the
    /// router. Returns the router device index for mapping calls.
    pub fn connect_midi(&mut self, device_name: &str) -> Result<usize, EngineError> {
        self.midi_inputs.connect(device_name, Arc::clone(&self.router))
    }

    /// Open the default output device and start pulling from the mixer.
    pub fn start_stream(&mut self) -> Result<(), EngineError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(EngineError::NoOutputDevice)?;

        let stream_config = cpal::StreamConfig {
            channels: self.config.channels as u16,
            sample_rate: cpal::SampleRate(self.config.sample_rate as u32),
            buffer_size: cpal::BufferSize::Default,
        };

        let mixer = Arc::clone(&self.mixer);
        let sequencer = Arc::clone(&self.sequencer);
        let audio_rate = self.config.tick_mode == TickMode::AudioRate;
        let sample_rate = self.config.sample_rate;
        let channels = self.config.channels;
        let max_block = self.config.max_block_size;

        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _| {
                    render_blocks(
                        &mixer, &sequencer, audio_rate, sample_rate, channels, max_block, data,
                    );
                },
                |err| tracing::error!(%err, "audio stream error"),
                None,
            )
            .map_err(|e| EngineError::Stream(e.to_string()))?;

        stream.play().map_err(|e| EngineError::Stream(e.to_string()))?;
        tracing::info!(
            sample_rate,
            channels,
            "audio stream running"
        );

        self.stream = Some(stream);
        Ok(())
    }

    /// Start the stream and the transport.
    pub fn start(&mut self) -> Result<(), EngineError> {
        self.start_stream()?;
        self.start_transport();
        Ok(())
    }

    pub fn start_transport(&self) {
        if let Ok(mut seq) = self.sequencer.lock() {
            seq.start();
        }
    }

    pub fn stop_transport(&self) {
        if let Ok(mut seq) = self.sequencer.lock() {
            seq.stop();
        }
    }

    /// Offline render path: pulls the same code the audio callback runs, so
    /// tests exercise real block processing without a device.
    pub fn render(&self, out: &mut [f32]) {
        render_blocks(
            &self.mixer,
            &self.sequencer,
            self.config.tick_mode == TickMode::AudioRate,
            self.config.sample_rate,
            self.config.channels,
            self.config.max_block_size,
            out,
        );
    }

    /// Tear everything down: sequencer first (joins scheduling threads),
    /// then the stream, event handlers, and MIDI devices. Hosted nodes drop
    /// with the mixer. Safe to call more than once.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        self.stop_transport();
        drop(self.stream.take());

        if let (Some(id), Ok(seq)) = (self.transport_subscription.take(), self.sequencer.lock()) {
            seq.events().unsubscribe(id);
        }

        self.midi_inputs.close_all();
        tracing::debug!("engine disposed");
    }

    fn lock_mixer(&self) -> Result<std::sync::MutexGuard<'_, Mixer>, EngineError> {
        self.mixer
            .lock()
            .map_err(|_| EngineError::Stream("mixer lock poisoned".into()))
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Fill `data` block by block: advance the sequencer when it is
/// sample-driven, then pull the mixer. Any lock failure degrades that block
/// to silence instead of unwinding into the audio driver.
fn render_blocks(
    mixer: &Mutex<Mixer>,
    sequencer: &Mutex<Sequencer>,
    audio_rate: bool,
    sample_rate: f32,
    channels: usize,
    max_block: usize,
    data: &mut [f32],
) {
    // The mixer's scratch is sized for MAX_BLOCK_SIZE, so the configured
    // block size cannot exceed it.
    let max_block = max_block.clamp(1, MAX_BLOCK_SIZE);
    let total_frames = data.len() / channels;
    let mut offset = 0;

    while offset < total_frames {
        let frames = (total_frames - offset).min(max_block);
        let block = &mut data[offset * channels..(offset + frames) * channels];

        if audio_rate {
            if let Ok(seq) = sequencer.lock() {
                seq.advance_audio(frames, sample_rate);
            }
        }

        match mixer.lock() {
            Ok(mut m) => {
                m.read(block);
            }
            Err(_) => block.fill(0.0),
        }

        offset += frames;
    }
}
