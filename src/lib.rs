//! synthctl - MIDI control surface for hardware synths
//!
//! Parameter table, CC/NRPN codec, port management and a bounded traffic
//! log, tied together by a [`controller::Controller`] that the binary drives
//! from a single event loop.

pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod message_log;
pub mod midi;
pub mod monitor;
pub mod params;
pub mod paths;
pub mod ports;

pub use error::{MidiError, Result};
