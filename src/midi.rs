//! Raw MIDI decoding and the `midir` device binding.
//!
//! Port callbacks run on `midir`'s own threads. They never touch game state:
//! every message is forwarded as a [`DeviceEvent`] over a channel and the
//! frame loop hands it to the mapper between frames.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use midir::{Ignore, MidiInput, MidiInputConnection};
use serde::Serialize;

use crate::error::MidiError;

const CLIENT_NAME: &str = "flappy-piano";

/// How often the port list is re-read to notice hot-plugged devices.
pub const RESCAN_INTERVAL: Duration = Duration::from_secs(2);

/// The subset of channel messages the game cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoteMessage {
    On { note: u8, velocity: u8 },
    Off { note: u8 },
}

/// Decode a raw channel message. Anything that isn't a note on/off, or is
/// too short to be one, yields `None`.
pub fn decode(data: &[u8]) -> Option<NoteMessage> {
    if data.len() < 3 {
        return None;
    }
    let note = data[1] & 0x7F;
    match data[0] & 0xF0 {
        0x90 if data[2] > 0 => Some(NoteMessage::On {
            note,
            velocity: data[2],
        }),
        // Note On with velocity 0 is a Note Off
        0x90 | 0x80 => Some(NoteMessage::Off { note }),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub id: String,
    pub name: String,
    pub manufacturer: Option<String>,
}

impl DeviceInfo {
    /// ALSA reports ports as `Client:Port NN:MM`; the client part is the
    /// closest thing to a manufacturer we get from `midir`.
    fn from_port(port: &PortEntry) -> Self {
        let manufacturer = port
            .name
            .split_once(':')
            .map(|(client, _)| client.trim().to_string())
            .filter(|client| !client.is_empty());
        Self {
            id: port.id.clone(),
            name: port.name.clone(),
            manufacturer,
        }
    }
}

/// A port as seen by one scan: `midir`'s stable id plus its display name.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PortEntry {
    id: String,
    name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub devices: Vec<DeviceInfo>,
}

impl ConnectionStatus {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn summary(&self) -> String {
        match self.devices.as_slice() {
            [] => "no MIDI device".to_string(),
            [one] => one.name.clone(),
            many => format!("{} MIDI devices", many.len()),
        }
    }
}

/// What the device layer tells the mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Message(Vec<u8>),
    Status(ConnectionStatus),
}

/// Binds every available input port and keeps the bindings current.
pub struct MidiDevices {
    tx: Sender<DeviceEvent>,
    connections: Vec<MidiInputConnection<()>>,
    ports: Vec<PortEntry>,
    last_scan: Option<Instant>,
}

impl MidiDevices {
    /// Creates the binding and the receiving end the frame loop drains.
    pub fn new() -> (Self, Receiver<DeviceEvent>) {
        let (tx, rx) = crossbeam_channel::unbounded();
        let devices = Self {
            tx,
            connections: Vec::new(),
            ports: Vec::new(),
            last_scan: None,
        };
        (devices, rx)
    }

    /// (Re)binds all ports and publishes a status snapshot. Returns `false`
    /// when MIDI access could not be acquired or no port could be bound.
    pub fn connect(&mut self) -> bool {
        self.last_scan = Some(Instant::now());
        self.disconnect();

        let ports = match list_ports() {
            Ok(ports) => ports,
            Err(e) => {
                log::warn!(target: "midi", "{e}");
                self.publish(ConnectionStatus::disconnected());
                return false;
            }
        };

        let mut devices = Vec::new();
        for port in &ports {
            match bind_port(port, self.tx.clone()) {
                Ok(conn) => {
                    log::info!(target: "midi", "listening on {}", port.name);
                    self.connections.push(conn);
                    devices.push(DeviceInfo::from_port(port));
                }
                Err(e) => log::warn!(target: "midi", "{e}"),
            }
        }
        self.ports = ports;

        let status = ConnectionStatus {
            connected: !self.connections.is_empty(),
            devices,
        };
        let connected = status.connected;
        self.publish(status);
        connected
    }

    /// Re-reads the port list every [`RESCAN_INTERVAL`] and reconnects when
    /// it changed. Returns `true` if a reconnect happened.
    pub fn poll_hotplug(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_scan {
            if now.duration_since(last) < RESCAN_INTERVAL {
                return false;
            }
        }
        self.last_scan = Some(now);

        let ports = list_ports().unwrap_or_default();
        if ports == self.ports {
            return false;
        }
        log::info!(target: "midi", "port list changed ({} ports), reconnecting", ports.len());
        self.connect();
        true
    }

    pub fn disconnect(&mut self) {
        for conn in self.connections.drain(..) {
            conn.close();
        }
        self.ports.clear();
    }

    fn publish(&self, status: ConnectionStatus) {
        // The receiver lives as long as the game; a send failure only
        // happens during shutdown.
        let _ = self.tx.send(DeviceEvent::Status(status));
    }
}

impl Drop for MidiDevices {
    fn drop(&mut self) {
        self.disconnect();
    }
}

fn list_ports() -> Result<Vec<PortEntry>, MidiError> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    Ok(midi_in
        .ports()
        .iter()
        .map(|p| PortEntry {
            id: p.id(),
            name: midi_in
                .port_name(p)
                .unwrap_or_else(|_| "Unknown".to_string()),
        })
        .collect())
}

/// Binds the port with `entry.id`. A port that disappeared since the scan is
/// an error, never a neighbour.
fn bind_port(
    entry: &PortEntry,
    tx: Sender<DeviceEvent>,
) -> Result<MidiInputConnection<()>, MidiError> {
    // `connect` consumes the MidiInput, so every port gets its own.
    let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| MidiError::Init(e.to_string()))?;
    midi_in.ignore(Ignore::All);

    let port = midi_in
        .find_port_by_id(entry.id.clone())
        .ok_or_else(|| MidiError::Connect {
            port: entry.name.clone(),
            message: "port vanished".to_string(),
        })?;
    let name = entry.name.clone();

    midi_in
        .connect(
            &port,
            "flappy-piano-input",
            move |_stamp, message, _| {
                if decode(message).is_some() {
                    let _ = tx.send(DeviceEvent::Message(message.to_vec()));
                }
            },
            (),
        )
        .map_err(|e| MidiError::Connect {
            port: name,
            message: e.to_string(),
        })
}
