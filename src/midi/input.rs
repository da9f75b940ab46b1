use std::sync::{Arc, Mutex};

use midir::{Ignore, MidiInput, MidiInputConnection};

use crate::{error::EngineError, midi::router::MidiRouter};

const CLIENT_NAME: &str = "ostinato-midi";

/// An available MIDI input port.
#[derive(Debug, Clone)]
pub struct MidiDeviceInfo {
    pub name: String,
    pub index: usize,
}

/// Owns the live midir connections feeding a shared router.
///
/// Each connection's callback runs on a driver thread: it hands the raw
/// bytes straight to `MidiRouter::handle_raw` under the router lock, which
/// is never taken by the audio thread. Dropping (or `close_all`) tears the
/// connections down before the router can go away.
#[derive(Default)]
pub struct MidiInputs {
    connections: Vec<MidiInputConnection<()>>,
}

impl MidiInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerate input ports visible to the OS.
    pub fn list_devices() -> Result<Vec<MidiDeviceInfo>, EngineError> {
        let midi_in = MidiInput::new(CLIENT_NAME).map_err(midi_err)?;
        let devices = midi_in
            .ports()
            .iter()
            .enumerate()
            .filter_map(|(index, port)| {
                midi_in
                    .port_name(port)
                    .ok()
                    .map(|name| MidiDeviceInfo { name, index })
            })
            .collect();
        Ok(devices)
    }

    /// Connect to the first port whose name contains `device_name`,
    /// registering it with the router. Returns the router's device index.
    pub fn connect(
        &mut self,
        device_name: &str,
        router: Arc<Mutex<MidiRouter>>,
    ) -> Result<usize, EngineError> {
        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(midi_err)?;
        midi_in.ignore(Ignore::Sysex);

        let ports = midi_in.ports();
        let port = ports
            .iter()
            .find(|p| {
                midi_in
                    .port_name(p)
                    .map(|n| n.contains(device_name))
                    .unwrap_or(false)
            })
            .ok_or_else(|| EngineError::Midi(format!("device '{device_name}' not found")))?;

        let port_name = midi_in.port_name(port).map_err(midi_err)?;
        let device = router
            .lock()
            .map_err(|_| EngineError::Midi("router lock poisoned".into()))?
            .add_device(port_name.clone());

        let callback_router = Arc::clone(&router);
        let connection = midi_in
            .connect(
                port,
                "ostinato-input",
                move |_timestamp, bytes, _| {
                    if let Ok(r) = callback_router.lock() {
                        r.handle_raw(device, bytes);
                    }
                },
                (),
            )
            .map_err(|e| EngineError::Midi(e.to_string()))?;

        tracing::info!(device, port = %port_name, "midi input connected");
        self.connections.push(connection);
        Ok(device)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Close every connection. Routing entries stay in the router; they just
    /// stop receiving input.
    pub fn close_all(&mut self) {
        for connection in self.connections.drain(..) {
            connection.close();
        }
    }
}

fn midi_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::Midi(e.to_string())
}
