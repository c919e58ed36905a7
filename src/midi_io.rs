//! MIDI hardware link over midir.
//!
//! The input callback runs on midir's thread. It only reassembles SysEx and
//! forwards complete messages over a channel; parsing and model updates happen
//! on whichever thread drains [`MidiLink::inbound`].

use crossbeam_channel::{unbounded, Receiver, Sender};
use midir::{Ignore, MidiIO, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};

use crate::error::{Error, Result};
use crate::protocol::{SYSEX_END, SYSEX_START};
use crate::transport::Transport;

const CLIENT_NAME: &str = "GaiaEdit";

fn transport_error(e: impl std::fmt::Display) -> Error {
    Error::Transport(e.to_string())
}

/// Joins SysEx split across several input callbacks.
#[derive(Debug, Default)]
pub struct SysExAssembler {
    buffer: Vec<u8>,
}

impl SysExAssembler {
    /// Feed one chunk; returns a complete message when one is available.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        if let Some(start) = chunk.iter().position(|&b| b == SYSEX_START) {
            self.buffer.clear();
            self.buffer.extend_from_slice(&chunk[start..]);
        } else if !self.buffer.is_empty() {
            self.buffer.extend_from_slice(chunk);
        } else {
            // channel voice or realtime, always delivered whole; stray data bytes are dropped
            return chunk
                .first()
                .is_some_and(|&status| status & 0x80 != 0)
                .then(|| chunk.to_vec());
        }

        if self.buffer.last() == Some(&SYSEX_END) {
            return Some(std::mem::take(&mut self.buffer));
        }
        None
    }
}

/// First port whose name contains `pattern`, ignoring case.
pub fn find_port_by_name<T: MidiIO>(io: &T, pattern: &str) -> Option<(T::Port, String)> {
    let pattern = pattern.to_lowercase();
    io.ports().into_iter().find_map(|port| {
        let name = io.port_name(&port).ok()?;
        name.to_lowercase().contains(&pattern).then_some((port, name))
    })
}

fn port_names<T: MidiIO>(io: &T) -> Vec<String> {
    io.ports()
        .iter()
        .filter_map(|port| io.port_name(port).ok())
        .collect()
}

/// Names of all input and output ports.
pub fn list_ports() -> Result<(Vec<String>, Vec<String>)> {
    let midi_in = MidiInput::new(CLIENT_NAME).map_err(transport_error)?;
    let midi_out = MidiOutput::new(CLIENT_NAME).map_err(transport_error)?;
    Ok((port_names(&midi_in), port_names(&midi_out)))
}

pub struct MidiLink {
    conn_out: MidiOutputConnection,
    _conn_in: MidiInputConnection<()>,
    inbound: Receiver<Vec<u8>>,
    port_name: String,
}

impl MidiLink {
    /// Open the first input and output port matching `pattern`.
    pub fn connect(pattern: &str) -> Result<Self> {
        let mut midi_in = MidiInput::new(&format!("{} Input", CLIENT_NAME)).map_err(transport_error)?;
        midi_in.ignore(Ignore::None);
        let midi_out = MidiOutput::new(&format!("{} Output", CLIENT_NAME)).map_err(transport_error)?;

        let (in_port, in_name) = find_port_by_name(&midi_in, pattern)
            .ok_or_else(|| Error::Transport(format!("no input port matching '{}'", pattern)))?;
        let (out_port, out_name) = find_port_by_name(&midi_out, pattern)
            .ok_or_else(|| Error::Transport(format!("no output port matching '{}'", pattern)))?;

        let conn_out = midi_out
            .connect(&out_port, &format!("{} Out", CLIENT_NAME))
            .map_err(transport_error)?;
        log::info!("connected output: {}", out_name);

        let (tx, inbound): (Sender<Vec<u8>>, Receiver<Vec<u8>>) = unbounded();
        let mut assembler = SysExAssembler::default();
        let conn_in = midi_in
            .connect(
                &in_port,
                &format!("{} In", CLIENT_NAME),
                move |_stamp, message, _| {
                    if let Some(complete) = assembler.push(message) {
                        if tx.send(complete).is_err() {
                            log::debug!("inbound receiver dropped");
                        }
                    }
                },
                (),
            )
            .map_err(transport_error)?;
        log::info!("connected input: {}", in_name);

        Ok(Self {
            conn_out,
            _conn_in: conn_in,
            inbound,
            port_name: out_name,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Complete inbound messages in arrival order.
    pub fn inbound(&self) -> &Receiver<Vec<u8>> {
        &self.inbound
    }
}

impl Transport for MidiLink {
    fn send(&mut self, message: &[u8]) -> Result<()> {
        self.conn_out.send(message).map_err(transport_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragmented_sysex() {
        let mut assembler = SysExAssembler::default();
        assert_eq!(assembler.push(&[0xF0, 0x41, 0x10]), None);
        assert_eq!(assembler.push(&[0x00, 0x00]), None);
        assert_eq!(
            assembler.push(&[0x41, 0x12, 0xF7]),
            Some(vec![0xF0, 0x41, 0x10, 0x00, 0x00, 0x41, 0x12, 0xF7])
        );
        assert_eq!(assembler.push(&[0x00, 0xF7]), None);
    }

    #[test]
    fn test_new_start_discards_partial() {
        let mut assembler = SysExAssembler::default();
        assembler.push(&[0xF0, 0x41, 0x10]);
        assert_eq!(assembler.push(&[0xF0, 0x7E, 0xF7]), Some(vec![0xF0, 0x7E, 0xF7]));
    }

    #[test]
    fn test_channel_messages_pass_through() {
        let mut assembler = SysExAssembler::default();
        assert_eq!(assembler.push(&[0xC0, 0x05]), Some(vec![0xC0, 0x05]));
        assert_eq!(assembler.push(&[]), None);
    }
}
