//! Controller - ties parameters, ports and the message log together
//!
//! The controller is owned by the event loop. Every mutation (parameter
//! writes, inbound traffic, port changes) goes through `&mut self`, so writes
//! to a channel are serialized and an NRPN sequence is never interleaved with
//! another message from this process.

#[cfg(test)]
mod tests;

use std::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::AppConfig;
use crate::error::{MidiError, Result};
use crate::message_log::{Direction, LogEntry, MessageLog};
use crate::midi::{
    decode, digitakt_channel_label, encode_cc, encode_note_off, encode_note_on, encode_nrpn,
    encode_program_change, MidiEvent, NrpnMessages, NrpnReceiver,
};
use crate::params::{ParameterSnapshot, ParameterTable};
use crate::ports::{InboundMessage, PortChange, PortDirection, PortInfo, PortManager};

/// Runtime switches taken from the config
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerOptions {
    pub nrpn_mode: bool,
    pub vendor_note_names: bool,
    pub log_capacity: usize,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            nrpn_mode: false,
            vendor_note_names: false,
            log_capacity: crate::message_log::DEFAULT_CAPACITY,
        }
    }
}

impl From<&AppConfig> for ControllerOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            nrpn_mode: config.midi.nrpn_mode,
            vendor_note_names: config.log.vendor_note_names,
            log_capacity: config.log.capacity,
        }
    }
}

/// How a parameter write went out on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    Cc,
    Nrpn,
}

impl WireFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            WireFormat::Cc => "CC",
            WireFormat::Nrpn => "NRPN",
        }
    }
}

pub struct Controller {
    params: ParameterTable,
    ports: PortManager,
    log: MessageLog,
    nrpn_mode: bool,
    vendor_note_names: bool,
    nrpn_rx: NrpnReceiver,
    /// Last enumeration failure, logged once until it changes or clears
    refresh_error: Option<String>,
}

impl Controller {
    pub fn new(params: ParameterTable, ports: PortManager, options: ControllerOptions) -> Self {
        Self {
            params,
            ports,
            log: MessageLog::new(options.log_capacity),
            nrpn_mode: options.nrpn_mode,
            vendor_note_names: options.vendor_note_names,
            nrpn_rx: NrpnReceiver::new(),
            refresh_error: None,
        }
    }

    pub fn params(&self) -> &ParameterTable {
        &self.params
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn log_mut(&mut self) -> &mut MessageLog {
        &mut self.log
    }

    pub fn nrpn_mode(&self) -> bool {
        self.nrpn_mode
    }

    pub fn set_nrpn_mode(&mut self, enabled: bool) {
        if self.nrpn_mode != enabled {
            info!("NRPN mode {}", if enabled { "enabled" } else { "disabled" });
        }
        self.nrpn_mode = enabled;
    }

    pub fn toggle_nrpn_mode(&mut self) -> bool {
        self.set_nrpn_mode(!self.nrpn_mode);
        self.nrpn_mode
    }

    /// Apply the runtime switches of a reloaded config
    pub fn apply_options(&mut self, options: ControllerOptions) {
        self.set_nrpn_mode(options.nrpn_mode);
        self.vendor_note_names = options.vendor_note_names;
        if self.log.capacity() != options.log_capacity {
            debug!("Message log capacity -> {}", options.log_capacity);
            self.log.set_capacity(options.log_capacity);
        }
    }

    // ===== Ports =====

    /// Re-enumerate ports, logging every arrival and departure.
    ///
    /// An enumeration failure is logged once; repeats of the same failure
    /// only go to tracing.
    pub fn refresh_ports(&mut self) -> Result<Vec<PortChange>> {
        let had_input = self.ports.selected_input().cloned();
        let had_output = self.ports.selected_output().cloned();

        let changes = match self.ports.refresh() {
            Ok(changes) => changes,
            Err(e) => {
                let message = e.to_string();
                if self.refresh_error.as_deref() == Some(message.as_str()) {
                    debug!("Port refresh still failing: {}", message);
                    return Err(e);
                }
                self.refresh_error = Some(message);
                return self.report(Err(e));
            }
        };
        if self.refresh_error.take().is_some() {
            self.log.push(LogEntry::system("Port enumeration recovered"));
        }
        for change in &changes {
            self.log.push(LogEntry::system(change.to_string()));
        }

        let now_input = self.ports.selected_input().cloned();
        let now_output = self.ports.selected_output().cloned();
        match (had_input, now_input) {
            (Some(port), None) => self
                .log
                .push(LogEntry::system(format!("Input deselected: {} is gone", port.name))),
            (None, Some(port)) => {
                self.nrpn_rx = NrpnReceiver::new();
                self.log
                    .push(LogEntry::system(format!("Reconnected to input: {}", port.name)));
            }
            _ => {}
        }
        match (had_output, now_output) {
            (Some(port), None) => self
                .log
                .push(LogEntry::system(format!("Output deselected: {} is gone", port.name))),
            (None, Some(port)) => self
                .log
                .push(LogEntry::system(format!("Reconnected to output: {}", port.name))),
            _ => {}
        }
        Ok(changes)
    }

    /// Select an input by id, index or name pattern; `None` deselects
    pub fn select_input(&mut self, pattern: Option<&str>) -> Result<Option<PortInfo>> {
        self.select(PortDirection::Input, pattern)
    }

    /// Select an output by id, index or name pattern; `None` deselects
    pub fn select_output(&mut self, pattern: Option<&str>) -> Result<Option<PortInfo>> {
        self.select(PortDirection::Output, pattern)
    }

    fn select(
        &mut self,
        direction: PortDirection,
        pattern: Option<&str>,
    ) -> Result<Option<PortInfo>> {
        let id = match pattern {
            None => None,
            Some(pattern) => match self.ports.find_port(direction, pattern) {
                Some(port) => Some(port.id.clone()),
                None => {
                    // An unknown port leaves nothing selected
                    self.select_port(direction, None)?;
                    return self.report(Err(MidiError::PortNotFound {
                        direction: direction.as_str(),
                        id: pattern.to_string(),
                    }));
                }
            },
        };

        let result = self.select_port(direction, id.as_deref());
        match &result {
            Ok(Some(port)) => self.log.push(LogEntry::system(format!(
                "Connected to {}: {}",
                direction.as_str().to_lowercase(),
                port.name
            ))),
            Ok(None) => self.log.push(LogEntry::system(format!(
                "{} deselected",
                direction.as_str()
            ))),
            Err(_) => {}
        }
        self.report(result)
    }

    fn select_port(
        &mut self,
        direction: PortDirection,
        id: Option<&str>,
    ) -> Result<Option<PortInfo>> {
        match direction {
            PortDirection::Input => {
                // Partial NRPN state from the previous device is meaningless
                self.nrpn_rx = NrpnReceiver::new();
                self.ports.select_input(id)
            }
            PortDirection::Output => self.ports.select_output(id),
        }
    }

    // ===== Outbound =====

    /// Clamp, store and transmit a parameter value addressed as `group.id`.
    ///
    /// The value is stored even if transmission fails. Returns the stored
    /// value and the wire format used.
    pub fn set_parameter(&mut self, key: &str, value: i32) -> Result<(u16, WireFormat)> {
        let Some(param) = self.params.get_mut(key) else {
            return self.report(Err(MidiError::UnknownParameter(key.to_string())));
        };
        let stored = param.set(value);
        let target = param.target;
        trace!("{} = {}", key, stored);

        // NRPN when switched on, or when the parameter has no CC
        let use_nrpn = target.nrpn.is_some() && (self.nrpn_mode || target.cc.is_none());
        let format = match (use_nrpn, target.cc, target.nrpn) {
            (true, _, Some(nrpn)) => {
                let result = encode_nrpn(target.channel, nrpn, stored)
                    .and_then(|messages| self.transmit_nrpn(&messages));
                self.report(result)?;
                WireFormat::Nrpn
            }
            (_, Some(cc), _) => {
                let result = u8::try_from(stored)
                    .map_err(|_| MidiError::range("value", stored, 127))
                    .and_then(|value| encode_cc(target.channel, cc, value))
                    .and_then(|message| self.transmit(&message));
                self.report(result)?;
                WireFormat::Cc
            }
            // No CC and no NRPN is rejected when the table is loaded
            _ => return self.report(Err(MidiError::UnknownParameter(key.to_string()))),
        };
        Ok((stored, format))
    }

    pub fn send_cc(&mut self, channel: u8, controller: u8, value: u8) -> Result<()> {
        let result = encode_cc(channel, controller, value).and_then(|m| self.transmit(&m));
        self.report(result)
    }

    pub fn send_nrpn(&mut self, channel: u8, parameter: u16, value: u16) -> Result<()> {
        let result =
            encode_nrpn(channel, parameter, value).and_then(|m| self.transmit_nrpn(&m));
        self.report(result)
    }

    /// Note On, or Note Off when `velocity` is 0
    pub fn send_note(&mut self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        let message = if velocity == 0 {
            encode_note_off(channel, note, 0)
        } else {
            encode_note_on(channel, note, velocity)
        };
        let result = message.and_then(|m| self.transmit(&m));
        self.report(result)
    }

    pub fn send_program_change(&mut self, channel: u8, program: u8) -> Result<()> {
        let result = encode_program_change(channel, program).and_then(|m| self.transmit(&m));
        self.report(result)
    }

    fn transmit(&mut self, data: &[u8]) -> Result<()> {
        self.ports.send(data)?;
        self.log_message(Direction::Out, data, Instant::now());
        Ok(())
    }

    /// Send the four NRPN messages in order, stopping at the first failure
    fn transmit_nrpn(&mut self, messages: &NrpnMessages) -> Result<()> {
        for (index, message) in messages.iter().enumerate() {
            match self.transmit(message) {
                Ok(()) => {}
                Err(MidiError::NoOutputSelected) => return Err(MidiError::NoOutputSelected),
                Err(e) => {
                    return Err(MidiError::NrpnInterrupted {
                        step: index + 1,
                        reason: e.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    /// Log a failure as a single error entry and hand it back
    fn report<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            warn!("{}", e);
            self.log.push(LogEntry::error(e.to_string()));
        }
        result
    }

    // ===== Inbound =====

    /// Decode and log one inbound message, then update any parameter it
    /// targets. Returns the number of parameters updated.
    pub fn handle_inbound(&mut self, message: InboundMessage) -> usize {
        let event = self.log_message(Direction::In, &message.data, message.received);

        let mut updated = 0;
        if let MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } = event
        {
            for param in self.params.by_cc_mut(channel, controller) {
                param.set(value as i32);
                updated += 1;
            }
        }
        if let Some(write) = self.nrpn_rx.feed(&event) {
            debug!(
                "NRPN in: channel {}, parameter {}, value {}",
                write.channel + 1,
                write.parameter,
                write.value
            );
            for param in self.params.by_nrpn_mut(write.channel, write.parameter) {
                param.set(write.value as i32);
                updated += 1;
            }
        }
        updated
    }

    fn log_message(&mut self, direction: Direction, data: &[u8], at: Instant) -> MidiEvent {
        let event = decode(data);
        let mut entry = LogEntry::message(direction, &event, data);

        if self.vendor_note_names {
            if let MidiEvent::NoteOn { channel, .. } | MidiEvent::NoteOff { channel, .. } = event {
                if let Some(label) = digitakt_channel_label(channel) {
                    entry.summary = format!("{} ({})", entry.summary, label);
                }
            }
        }
        self.log.push_at(entry, at);
        event
    }

    // ===== Parameters =====

    pub fn snapshot(&self) -> ParameterSnapshot {
        ParameterSnapshot::from_table(&self.params)
    }

    /// Restore values from a snapshot without transmitting them
    pub fn restore(&mut self, snapshot: &ParameterSnapshot) -> usize {
        let restored = snapshot.restore_into(&mut self.params);
        self.log.push(LogEntry::system(format!(
            "Restored {} parameter values",
            restored
        )));
        restored
    }

    /// Swap in a reloaded table, carrying current values over by `group.id`
    pub fn replace_parameters(&mut self, mut table: ParameterTable) {
        table.carry_values_from(&self.params);
        info!("Parameter table replaced ({} parameters)", table.len());
        self.params = table;
    }

    pub fn reset_parameters(&mut self) {
        self.params.reset_all();
    }
}
