//! MIDI port management
//!
//! Enumerates input/output ports through a [`MidiBackend`], keeps the user's
//! selection, and forwards inbound bytes into the event loop over a tokio
//! channel. Backend callbacks never touch controller state directly.

pub mod memory;
pub mod midir_backend;

use std::fmt;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{MidiError, Result};

pub use memory::MemoryBackend;
pub use midir_backend::MidirBackend;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

impl PortDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            PortDirection::Input => "Input",
            PortDirection::Output => "Output",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortState {
    Connected,
    Disconnected,
}

/// A port as reported by the backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    pub id: String,
    pub name: String,
    pub manufacturer: String,
    pub direction: PortDirection,
}

impl fmt::Display for PortInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.id)
    }
}

/// A port that appeared or disappeared between two enumerations
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChange {
    pub port: PortInfo,
    pub state: PortState,
}

impl fmt::Display for PortChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} device \"{}\" {}",
            self.port.direction.as_str(),
            self.port.name,
            match self.state {
                PortState::Connected => "connected",
                PortState::Disconnected => "disconnected",
            }
        )
    }
}

/// Raw bytes received on the selected input
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub port_id: String,
    pub data: Vec<u8>,
    pub received: Instant,
}

/// Handler invoked by the backend for every inbound byte sequence
pub type InboundCallback = Box<dyn FnMut(&[u8]) + Send + 'static>;

/// An open output port
pub trait OutputConnection {
    fn send(&mut self, data: &[u8]) -> Result<()>;
}

/// An open input port; dropping it detaches the handler
pub trait InputConnection {
    fn port_id(&self) -> &str;
}

/// Platform MIDI transport
pub trait MidiBackend {
    fn inputs(&self) -> Result<Vec<PortInfo>>;

    fn outputs(&self) -> Result<Vec<PortInfo>>;

    fn open_output(&mut self, id: &str) -> Result<Box<dyn OutputConnection>>;

    fn open_input(
        &mut self,
        id: &str,
        callback: InboundCallback,
    ) -> Result<Box<dyn InputConnection>>;
}

struct SelectedInput {
    info: PortInfo,
    connection: Box<dyn InputConnection>,
}

struct SelectedOutput {
    info: PortInfo,
    connection: Box<dyn OutputConnection>,
}

/// Owns the port lists and the current input/output selection
pub struct PortManager {
    backend: Box<dyn MidiBackend>,
    inputs: Vec<PortInfo>,
    outputs: Vec<PortInfo>,
    input: Option<SelectedInput>,
    output: Option<SelectedOutput>,
    /// Ids the user chose; kept while the port is unplugged
    wanted_input: Option<String>,
    wanted_output: Option<String>,
    inbound_tx: mpsc::Sender<InboundMessage>,
}

impl PortManager {
    /// Create a manager; inbound messages are delivered on `inbound_tx`
    pub fn new(backend: Box<dyn MidiBackend>, inbound_tx: mpsc::Sender<InboundMessage>) -> Self {
        Self {
            backend,
            inputs: Vec::new(),
            outputs: Vec::new(),
            input: None,
            output: None,
            wanted_input: None,
            wanted_output: None,
            inbound_tx,
        }
    }

    pub fn inputs(&self) -> &[PortInfo] {
        &self.inputs
    }

    pub fn outputs(&self) -> &[PortInfo] {
        &self.outputs
    }

    pub fn selected_input(&self) -> Option<&PortInfo> {
        self.input.as_ref().map(|s| &s.info)
    }

    pub fn selected_output(&self) -> Option<&PortInfo> {
        self.output.as_ref().map(|s| &s.info)
    }

    /// Re-enumerate ports.
    ///
    /// A selection survives when a port with the same id is still present;
    /// otherwise its connection is closed but the id is remembered, and the
    /// port is reopened by the first refresh that lists it again. Returns the
    /// ports that appeared or vanished.
    pub fn refresh(&mut self) -> Result<Vec<PortChange>> {
        let inputs = self.backend.inputs()?;
        let outputs = self.backend.outputs()?;

        let mut changes = diff_ports(&self.inputs, &inputs);
        changes.extend(diff_ports(&self.outputs, &outputs));

        self.inputs = inputs;
        self.outputs = outputs;

        if let Some(selected) = &self.input {
            let id = selected.connection.port_id();
            if !self.inputs.iter().any(|p| p.id == id) {
                warn!("Selected input '{}' disappeared", selected.info.name);
                self.input = None;
            }
        }
        if let Some(selected) = &self.output {
            if !self.outputs.iter().any(|p| p.id == selected.info.id) {
                warn!("Selected output '{}' disappeared", selected.info.name);
                self.output = None;
            }
        }
        self.reopen_wanted();

        debug!(
            "Port list refreshed: {} inputs, {} outputs",
            self.inputs.len(),
            self.outputs.len()
        );
        Ok(changes)
    }

    /// Reconnect remembered ports that are listed again
    fn reopen_wanted(&mut self) {
        if self.input.is_none() {
            if let Some(id) = self.wanted_input.clone() {
                if self.inputs.iter().any(|p| p.id == id) {
                    if let Err(e) = self.open_input(&id) {
                        debug!("Input '{}' is back but could not be reopened: {}", id, e);
                    }
                }
            }
        }
        if self.output.is_none() {
            if let Some(id) = self.wanted_output.clone() {
                if self.outputs.iter().any(|p| p.id == id) {
                    if let Err(e) = self.open_output(&id) {
                        debug!("Output '{}' is back but could not be reopened: {}", id, e);
                    }
                }
            }
        }
    }

    /// Resolve a port by exact id, list index, or case-insensitive name
    /// substring
    pub fn find_port(&self, direction: PortDirection, pattern: &str) -> Option<&PortInfo> {
        let ports = match direction {
            PortDirection::Input => &self.inputs,
            PortDirection::Output => &self.outputs,
        };

        if let Some(port) = ports.iter().find(|p| p.id == pattern) {
            return Some(port);
        }
        if let Ok(index) = pattern.parse::<usize>() {
            return ports.get(index);
        }
        let pattern = pattern.to_lowercase();
        ports
            .iter()
            .find(|p| p.name.to_lowercase().contains(&pattern))
    }

    /// Select an input by id, or deselect with `None`.
    ///
    /// The previous handler is detached before the new one is attached.
    pub fn select_input(&mut self, id: Option<&str>) -> Result<Option<PortInfo>> {
        if let Some(previous) = self.input.take() {
            debug!("Detached input '{}'", previous.connection.port_id());
        }
        self.wanted_input = None;

        let Some(id) = id else {
            return Ok(None);
        };
        let info = self.open_input(id)?;
        self.wanted_input = Some(info.id.clone());
        Ok(Some(info))
    }

    fn open_input(&mut self, id: &str) -> Result<PortInfo> {
        let info = self
            .inputs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "Input",
                id: id.to_string(),
            })?;

        let tx = self.inbound_tx.clone();
        let port_id = info.id.clone();
        let callback: InboundCallback = Box::new(move |data: &[u8]| {
            let message = InboundMessage {
                port_id: port_id.clone(),
                data: data.to_vec(),
                received: Instant::now(),
            };
            // Never block the backend thread
            if let Err(e) = tx.try_send(message) {
                warn!("Dropped inbound MIDI message: {}", e);
            }
        });

        let connection = self.backend.open_input(&info.id, callback)?;
        info!("Connected to input: {}", info.name);
        self.input = Some(SelectedInput {
            info: info.clone(),
            connection,
        });
        Ok(info)
    }

    /// Select an output by id, or deselect with `None`
    pub fn select_output(&mut self, id: Option<&str>) -> Result<Option<PortInfo>> {
        self.output = None;
        self.wanted_output = None;

        let Some(id) = id else {
            return Ok(None);
        };
        let info = self.open_output(id)?;
        self.wanted_output = Some(info.id.clone());
        Ok(Some(info))
    }

    fn open_output(&mut self, id: &str) -> Result<PortInfo> {
        let info = self
            .outputs
            .iter()
            .find(|p| p.id == id)
            .cloned()
            .ok_or_else(|| MidiError::PortNotFound {
                direction: "Output",
                id: id.to_string(),
            })?;

        let connection = self.backend.open_output(&info.id)?;
        info!("Connected to output: {}", info.name);
        self.output = Some(SelectedOutput {
            info: info.clone(),
            connection,
        });
        Ok(info)
    }

    /// Send raw bytes to the selected output
    pub fn send(&mut self, data: &[u8]) -> Result<()> {
        let output = self.output.as_mut().ok_or(MidiError::NoOutputSelected)?;
        output.connection.send(data)
    }
}

fn diff_ports(old: &[PortInfo], new: &[PortInfo]) -> Vec<PortChange> {
    let gone = old
        .iter()
        .filter(|p| !new.iter().any(|n| n.id == p.id))
        .map(|p| PortChange {
            port: p.clone(),
            state: PortState::Disconnected,
        });
    let added = new
        .iter()
        .filter(|p| !old.iter().any(|o| o.id == p.id))
        .map(|p| PortChange {
            port: p.clone(),
            state: PortState::Connected,
        });
    gone.chain(added).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> (PortManager, memory::MemoryHandle, mpsc::Receiver<InboundMessage>) {
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Input, "in-1", "Elektron Digitakt");
        handle.add_port(PortDirection::Output, "out-1", "Elektron Digitakt");
        handle.add_port(PortDirection::Output, "out-2", "IAC Driver Bus 1");
        let (tx, rx) = mpsc::channel(16);
        (PortManager::new(Box::new(backend), tx), handle, rx)
    }

    #[test]
    fn test_first_refresh_reports_all_ports_connected() {
        let (mut ports, _handle, _rx) = manager();
        let changes = ports.refresh().unwrap();

        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| c.state == PortState::Connected));
        assert_eq!(ports.inputs().len(), 1);
        assert_eq!(ports.outputs().len(), 2);
        assert_eq!(
            changes[0].to_string(),
            "Input device \"Elektron Digitakt\" connected"
        );
    }

    #[test]
    fn test_find_port_by_id_index_and_name() {
        let (mut ports, _handle, _rx) = manager();
        ports.refresh().unwrap();

        let by_id = ports.find_port(PortDirection::Output, "out-2").unwrap();
        assert_eq!(by_id.name, "IAC Driver Bus 1");

        let by_index = ports.find_port(PortDirection::Output, "1").unwrap();
        assert_eq!(by_index.id, "out-2");

        let by_name = ports.find_port(PortDirection::Output, "digitakt").unwrap();
        assert_eq!(by_name.id, "out-1");

        assert!(ports.find_port(PortDirection::Input, "iac").is_none());
    }

    #[test]
    fn test_send_without_output_fails() {
        let (mut ports, _handle, _rx) = manager();
        ports.refresh().unwrap();
        assert_eq!(ports.send(&[0xB0, 1, 2]), Err(MidiError::NoOutputSelected));
    }

    #[test]
    fn test_select_and_send() {
        let (mut ports, handle, _rx) = manager();
        ports.refresh().unwrap();

        ports.select_output(Some("out-1")).unwrap();
        ports.send(&[0xB0, 74, 10]).unwrap();

        assert_eq!(handle.sent(), vec![("out-1".to_string(), vec![0xB0, 74, 10])]);

        ports.select_output(None).unwrap();
        assert!(ports.selected_output().is_none());
    }

    #[test]
    fn test_select_unknown_port_clears_selection() {
        let (mut ports, _handle, _rx) = manager();
        ports.refresh().unwrap();
        ports.select_output(Some("out-1")).unwrap();

        let result = ports.select_output(Some("nope"));
        assert!(matches!(result, Err(MidiError::PortNotFound { .. })));
        assert!(ports.selected_output().is_none());
    }

    #[test]
    fn test_input_handler_forwards_bytes() {
        let (mut ports, handle, mut rx) = manager();
        ports.refresh().unwrap();
        ports.select_input(Some("in-1")).unwrap();

        handle.inject("in-1", &[0x90, 60, 64]);

        let message = rx.try_recv().unwrap();
        assert_eq!(message.port_id, "in-1");
        assert_eq!(message.data, vec![0x90, 60, 64]);
    }

    #[test]
    fn test_switching_input_detaches_previous_handler() {
        let (mut ports, handle, mut rx) = manager();
        handle.add_port(PortDirection::Input, "in-2", "Keystep");
        ports.refresh().unwrap();

        ports.select_input(Some("in-1")).unwrap();
        ports.select_input(Some("in-2")).unwrap();

        handle.inject("in-1", &[0x90, 60, 64]);
        assert!(rx.try_recv().is_err());

        handle.inject("in-2", &[0x80, 60, 0]);
        assert_eq!(rx.try_recv().unwrap().port_id, "in-2");
    }

    #[test]
    fn test_refresh_preserves_selection_by_identity() {
        let (mut ports, handle, _rx) = manager();
        ports.refresh().unwrap();
        ports.select_output(Some("out-1")).unwrap();
        ports.select_input(Some("in-1")).unwrap();

        handle.remove_port(PortDirection::Output, "out-2");
        let changes = ports.refresh().unwrap();

        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].state, PortState::Disconnected);
        assert_eq!(ports.selected_output().map(|p| p.id.as_str()), Some("out-1"));
        assert_eq!(ports.selected_input().map(|p| p.id.as_str()), Some("in-1"));
    }

    #[test]
    fn test_refresh_clears_vanished_selection() {
        let (mut ports, handle, _rx) = manager();
        ports.refresh().unwrap();
        ports.select_output(Some("out-1")).unwrap();
        ports.select_input(Some("in-1")).unwrap();

        handle.remove_port(PortDirection::Output, "out-1");
        handle.remove_port(PortDirection::Input, "in-1");
        ports.refresh().unwrap();

        assert!(ports.selected_output().is_none());
        assert!(ports.selected_input().is_none());
    }

    #[test]
    fn test_replugged_port_is_reopened() {
        let (mut ports, handle, mut rx) = manager();
        ports.refresh().unwrap();
        ports.select_output(Some("out-1")).unwrap();
        ports.select_input(Some("in-1")).unwrap();

        handle.remove_port(PortDirection::Output, "out-1");
        handle.remove_port(PortDirection::Input, "in-1");
        ports.refresh().unwrap();
        assert_eq!(ports.send(&[0xB0, 74, 1]), Err(MidiError::NoOutputSelected));
        assert_eq!(handle.attached_inputs(), 0);

        handle.add_port(PortDirection::Output, "out-1", "Elektron Digitakt");
        handle.add_port(PortDirection::Input, "in-1", "Elektron Digitakt");
        let changes = ports.refresh().unwrap();

        assert_eq!(changes.len(), 2);
        assert_eq!(ports.selected_output().map(|p| p.id.as_str()), Some("out-1"));
        assert_eq!(ports.selected_input().map(|p| p.id.as_str()), Some("in-1"));
        ports.send(&[0xB0, 74, 2]).unwrap();
        assert_eq!(handle.sent(), vec![("out-1".to_string(), vec![0xB0, 74, 2])]);

        handle.inject("in-1", &[0x90, 60, 64]);
        assert_eq!(rx.try_recv().unwrap().data, vec![0x90, 60, 64]);
    }

    #[test]
    fn test_deselected_port_stays_closed_when_replugged() {
        let (mut ports, handle, _rx) = manager();
        ports.refresh().unwrap();
        ports.select_output(Some("out-1")).unwrap();

        handle.remove_port(PortDirection::Output, "out-1");
        ports.refresh().unwrap();
        ports.select_output(None).unwrap();

        handle.add_port(PortDirection::Output, "out-1", "Elektron Digitakt");
        ports.refresh().unwrap();
        assert!(ports.selected_output().is_none());
    }
}
