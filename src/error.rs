//! Error types for the control surface.
//!
//! Library code returns [`MidiError`]; the binary edges (config loading,
//! the REPL, `main`) wrap these in `anyhow` with context.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MidiError {
    #[error("{field} out of range: {value} (expected 0..={max})")]
    InvalidRange {
        field: &'static str,
        value: u32,
        max: u32,
    },

    #[error("No output device selected")]
    NoOutputSelected,

    #[error("{direction} port '{id}' not found")]
    PortNotFound { direction: &'static str, id: String },

    #[error("Failed to send MIDI message: {0}")]
    Transport(String),

    #[error("NRPN sequence interrupted at message {step} of 4: {reason}")]
    NrpnInterrupted { step: usize, reason: String },

    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    #[error("MIDI backend error: {0}")]
    Backend(String),
}

impl MidiError {
    pub(crate) fn range(field: &'static str, value: impl Into<u32>, max: u32) -> Self {
        MidiError::InvalidRange {
            field,
            value: value.into(),
            max,
        }
    }
}

impl From<midir::InitError> for MidiError {
    fn from(e: midir::InitError) -> Self {
        MidiError::Backend(e.to_string())
    }
}

impl From<midir::SendError> for MidiError {
    fn from(e: midir::SendError) -> Self {
        MidiError::Transport(e.to_string())
    }
}

impl From<midir::PortInfoError> for MidiError {
    fn from(e: midir::PortInfoError) -> Self {
        MidiError::Backend(e.to_string())
    }
}

impl<T> From<midir::ConnectError<T>> for MidiError {
    fn from(e: midir::ConnectError<T>) -> Self {
        MidiError::Backend(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MidiError>;
