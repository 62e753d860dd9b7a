//! Hardware backend on top of midir

use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, trace};

use super::{
    InboundCallback, InputConnection, MidiBackend, OutputConnection, PortDirection, PortInfo,
};
use crate::error::{MidiError, Result};

/// midir does not report manufacturers
const UNKNOWN_MANUFACTURER: &str = "Unknown";

pub struct MidirBackend {
    client_name: String,
}

impl MidirBackend {
    pub fn new(client_name: impl Into<String>) -> Self {
        Self {
            client_name: client_name.into(),
        }
    }
}

impl MidiBackend for MidirBackend {
    fn inputs(&self) -> Result<Vec<PortInfo>> {
        let midi_in = MidiInput::new(&format!("{}-scanner", self.client_name))?;

        let mut ports = Vec::new();
        for port in midi_in.ports() {
            if let Ok(name) = midi_in.port_name(&port) {
                ports.push(PortInfo {
                    id: port.id(),
                    name,
                    manufacturer: UNKNOWN_MANUFACTURER.to_string(),
                    direction: PortDirection::Input,
                });
            }
        }
        Ok(ports)
    }

    fn outputs(&self) -> Result<Vec<PortInfo>> {
        let midi_out = MidiOutput::new(&format!("{}-scanner", self.client_name))?;

        let mut ports = Vec::new();
        for port in midi_out.ports() {
            if let Ok(name) = midi_out.port_name(&port) {
                ports.push(PortInfo {
                    id: port.id(),
                    name,
                    manufacturer: UNKNOWN_MANUFACTURER.to_string(),
                    direction: PortDirection::Output,
                });
            }
        }
        Ok(ports)
    }

    fn open_output(&mut self, id: &str) -> Result<Box<dyn OutputConnection>> {
        let midi_out = MidiOutput::new(&format!("{}-out", self.client_name))?;
        let port = midi_out
            .find_port_by_id(id.to_string())
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "Output",
                id: id.to_string(),
            })?;

        let connection = midi_out.connect(&port, &self.client_name)?;
        debug!("midir output opened: {}", id);
        Ok(Box::new(MidirOutput { connection }))
    }

    fn open_input(
        &mut self,
        id: &str,
        mut callback: InboundCallback,
    ) -> Result<Box<dyn InputConnection>> {
        let mut midi_in = MidiInput::new(&format!("{}-in", self.client_name))?;
        // Sysex, clock and active sensing all go to the log
        midi_in.ignore(Ignore::None);

        let port = midi_in
            .find_port_by_id(id.to_string())
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "Input",
                id: id.to_string(),
            })?;

        let connection = midi_in.connect(
            &port,
            &self.client_name,
            move |_timestamp, data, _| {
                trace!("midir RX {} bytes", data.len());
                callback(data);
            },
            (),
        )?;
        debug!("midir input opened: {}", id);

        Ok(Box::new(MidirInput {
            id: id.to_string(),
            _connection: connection,
        }))
    }
}

struct MidirOutput {
    connection: MidiOutputConnection,
}

impl OutputConnection for MidirOutput {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        self.connection.send(data)?;
        Ok(())
    }
}

struct MidirInput {
    id: String,
    _connection: MidiInputConnection<()>,
}

impl InputConnection for MidirInput {
    fn port_id(&self) -> &str {
        &self.id
    }
}
