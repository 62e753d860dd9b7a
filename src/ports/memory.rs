//! In-process MIDI backend
//!
//! No hardware involved: ports are added and removed through a
//! [`MemoryHandle`], outbound bytes are recorded, and inbound bytes are
//! injected by hand. Used by `--dry-run` and by the tests.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use super::{
    InboundCallback, InputConnection, MidiBackend, OutputConnection, PortDirection, PortInfo,
};
use crate::error::{MidiError, Result};

/// Sent messages remembered; older ones are dropped
const SENT_HISTORY: usize = 1024;

#[derive(Default)]
struct MemoryState {
    inputs: Vec<PortInfo>,
    outputs: Vec<PortInfo>,
    sent: VecDeque<(String, Vec<u8>)>,
    /// Set while port enumeration should fail
    enumeration_error: Option<String>,
    /// Successful sends left before the transport starts failing
    sends_before_failure: Option<usize>,
    /// Attached input handlers, keyed by connection token
    handlers: HashMap<u64, (String, InboundCallback)>,
    next_token: u64,
    /// (output id, input id): bytes sent on the output arrive on the input
    loopback: Option<(String, String)>,
}

impl MemoryState {
    fn deliver(&mut self, id: &str, data: &[u8]) {
        for (port_id, callback) in self.handlers.values_mut() {
            if port_id == id {
                callback(data);
            }
        }
    }
}

/// Backend whose ports live in memory
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

/// Test/driver side of a [`MemoryBackend`]
#[derive(Clone)]
pub struct MemoryHandle {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle(&self) -> MemoryHandle {
        MemoryHandle {
            state: self.state.clone(),
        }
    }
}

impl MemoryHandle {
    pub fn add_port(&self, direction: PortDirection, id: &str, name: &str) {
        let port = PortInfo {
            id: id.to_string(),
            name: name.to_string(),
            manufacturer: "Unknown".to_string(),
            direction,
        };
        let mut state = self.state.lock();
        match direction {
            PortDirection::Input => state.inputs.push(port),
            PortDirection::Output => state.outputs.push(port),
        }
    }

    pub fn remove_port(&self, direction: PortDirection, id: &str) {
        let mut state = self.state.lock();
        match direction {
            PortDirection::Input => state.inputs.retain(|p| p.id != id),
            PortDirection::Output => state.outputs.retain(|p| p.id != id),
        }
    }

    /// Deliver bytes to every handler attached to input `id`
    pub fn inject(&self, id: &str, data: &[u8]) {
        self.state.lock().deliver(id, data);
    }

    /// Echo everything sent on `output` back in on `input`
    pub fn set_loopback(&self, output: &str, input: &str) {
        self.state.lock().loopback = Some((output.to_string(), input.to_string()));
    }

    /// The most recent sends, oldest first, as (output id, bytes)
    pub fn sent(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().sent.iter().cloned().collect()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    /// Let `count` more sends succeed, then fail every send after that
    pub fn fail_sends_after(&self, count: usize) {
        self.state.lock().sends_before_failure = Some(count);
    }

    /// Make port enumeration fail with `reason`; `None` restores it
    pub fn fail_enumeration(&self, reason: Option<&str>) {
        self.state.lock().enumeration_error = reason.map(str::to_string);
    }

    pub fn attached_inputs(&self) -> usize {
        self.state.lock().handlers.len()
    }
}

impl MidiBackend for MemoryBackend {
    fn inputs(&self) -> Result<Vec<PortInfo>> {
        let state = self.state.lock();
        match &state.enumeration_error {
            Some(reason) => Err(MidiError::Backend(reason.clone())),
            None => Ok(state.inputs.clone()),
        }
    }

    fn outputs(&self) -> Result<Vec<PortInfo>> {
        let state = self.state.lock();
        match &state.enumeration_error {
            Some(reason) => Err(MidiError::Backend(reason.clone())),
            None => Ok(state.outputs.clone()),
        }
    }

    fn open_output(&mut self, id: &str) -> Result<Box<dyn OutputConnection>> {
        if !self.state.lock().outputs.iter().any(|p| p.id == id) {
            return Err(MidiError::PortNotFound {
                direction: "Output",
                id: id.to_string(),
            });
        }
        Ok(Box::new(MemoryOutput {
            id: id.to_string(),
            state: self.state.clone(),
        }))
    }

    fn open_input(
        &mut self,
        id: &str,
        callback: InboundCallback,
    ) -> Result<Box<dyn InputConnection>> {
        let mut state = self.state.lock();
        if !state.inputs.iter().any(|p| p.id == id) {
            return Err(MidiError::PortNotFound {
                direction: "Input",
                id: id.to_string(),
            });
        }
        let token = state.next_token;
        state.next_token += 1;
        state.handlers.insert(token, (id.to_string(), callback));

        Ok(Box::new(MemoryInput {
            id: id.to_string(),
            token,
            state: self.state.clone(),
        }))
    }
}

struct MemoryOutput {
    id: String,
    state: Arc<Mutex<MemoryState>>,
}

impl OutputConnection for MemoryOutput {
    fn send(&mut self, data: &[u8]) -> Result<()> {
        let mut state = self.state.lock();
        if !state.outputs.iter().any(|p| p.id == self.id) {
            return Err(MidiError::Transport(format!("port '{}' is gone", self.id)));
        }
        match state.sends_before_failure {
            Some(0) => return Err(MidiError::Transport("device unplugged".to_string())),
            Some(ref mut left) => *left -= 1,
            None => {}
        }
        state.sent.push_back((self.id.clone(), data.to_vec()));
        if state.sent.len() > SENT_HISTORY {
            state.sent.pop_front();
        }

        let echo_to = match &state.loopback {
            Some((output, input)) if *output == self.id => Some(input.clone()),
            _ => None,
        };
        if let Some(input) = echo_to {
            state.deliver(&input, data);
        }
        Ok(())
    }
}

struct MemoryInput {
    id: String,
    token: u64,
    state: Arc<Mutex<MemoryState>>,
}

impl InputConnection for MemoryInput {
    fn port_id(&self) -> &str {
        &self.id
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.state.lock().handlers.remove(&self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_dropping_input_detaches_handler() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Input, "in", "Input");

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        let connection = backend
            .open_input(
                "in",
                Box::new(move |_: &[u8]| {
                    counter.fetch_add(1, Ordering::SeqCst);
                }),
            )
            .unwrap();
        assert_eq!(connection.port_id(), "in");

        handle.inject("in", &[0xF8]);
        drop(connection);
        handle.inject("in", &[0xF8]);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert_eq!(handle.attached_inputs(), 0);
    }

    #[test]
    fn test_send_failure_injection() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Output, "out", "Output");
        let mut output = backend.open_output("out").unwrap();

        handle.fail_sends_after(1);
        assert!(output.send(&[1]).is_ok());
        assert!(matches!(output.send(&[2]), Err(MidiError::Transport(_))));
        assert_eq!(handle.sent().len(), 1);
    }

    #[test]
    fn test_loopback_echoes_sent_bytes() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Output, "out", "Loopback Out");
        handle.add_port(PortDirection::Input, "in", "Loopback In");
        handle.set_loopback("out", "in");

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = received.clone();
        let _input = backend
            .open_input("in", Box::new(move |data: &[u8]| sink.lock().push(data.to_vec())))
            .unwrap();
        let mut output = backend.open_output("out").unwrap();

        output.send(&[0xB0, 74, 64]).unwrap();
        assert_eq!(*received.lock(), vec![vec![0xB0, 74, 64]]);
    }

    #[test]
    fn test_sent_history_is_bounded() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Output, "out", "Output");
        let mut output = backend.open_output("out").unwrap();

        for i in 0..SENT_HISTORY + 10 {
            output.send(&[0xB0, 1, (i % 128) as u8]).unwrap();
        }

        let sent = handle.sent();
        assert_eq!(sent.len(), SENT_HISTORY);
        assert_eq!(sent[0].1, vec![0xB0, 1, 10]);
    }

    #[test]
    fn test_enumeration_failure_injection() {
        let backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Input, "in", "Input");

        handle.fail_enumeration(Some("no MIDI service"));
        assert_eq!(
            backend.inputs(),
            Err(MidiError::Backend("no MIDI service".to_string()))
        );
        handle.fail_enumeration(None);
        assert_eq!(backend.inputs().unwrap().len(), 1);
    }

    #[test]
    fn test_send_to_removed_port_fails() {
        let mut backend = MemoryBackend::new();
        let handle = backend.handle();
        handle.add_port(PortDirection::Output, "out", "Output");
        let mut output = backend.open_output("out").unwrap();

        handle.remove_port(PortDirection::Output, "out");
        assert!(output.send(&[0xB0, 1, 1]).is_err());
    }
}
