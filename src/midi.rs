//! MIDI codec
//!
//! Encodes parameter writes into Control Change and NRPN byte sequences and
//! decodes arbitrary inbound bytes into [`MidiEvent`]s. Decoding never fails:
//! inbound bytes come from hardware, so anything malformed becomes
//! [`MidiEvent::Unknown`] carrying the raw dump.

use std::fmt;

use crate::error::{MidiError, Result};

/// Controller numbers of the NRPN idiom, in transmission order.
pub const CC_NRPN_MSB: u8 = 99;
pub const CC_NRPN_LSB: u8 = 98;
pub const CC_DATA_ENTRY_MSB: u8 = 6;
pub const CC_DATA_ENTRY_LSB: u8 = 38;

pub const MAX_CHANNEL: u8 = 15;
pub const MAX_7BIT: u8 = 127;
pub const MAX_14BIT: u16 = 16383;

const PITCH_BEND_CENTER: i16 = 8192;

const PITCH_CLASSES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// A single three-byte channel message.
pub type ShortMessage = [u8; 3];

/// The four Control Change messages of one NRPN write.
pub type NrpnMessages = [ShortMessage; 4];

/// Decoded MIDI message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MidiEvent {
    /// Zero-length input
    Empty,

    /// Note Off: channel (0-15), note (0-127), velocity (0-127)
    NoteOff { channel: u8, note: u8, velocity: u8 },

    /// Note On with non-zero velocity
    NoteOn { channel: u8, note: u8, velocity: u8 },

    /// Polyphonic aftertouch
    Aftertouch { channel: u8, note: u8, pressure: u8 },

    /// Control Change: channel (0-15), controller (0-127), value (0-127)
    ControlChange { channel: u8, controller: u8, value: u8 },

    /// Program Change: channel (0-15), program (0-127)
    ProgramChange { channel: u8, program: u8 },

    /// Channel Pressure: channel (0-15), pressure (0-127)
    ChannelPressure { channel: u8, pressure: u8 },

    /// Pitch Bend, signed around center: -8192..=8191
    PitchBend { channel: u8, value: i16 },

    /// System Exclusive, full raw bytes including F0
    SysEx { data: Vec<u8> },

    /// Other system common / realtime messages
    System { data: Vec<u8> },

    /// Anything that could not be decoded
    Unknown { data: Vec<u8> },
}

/// Message kind, used for log entries and traffic statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MessageKind {
    Empty,
    NoteOff,
    NoteOn,
    Aftertouch,
    ControlChange,
    ProgramChange,
    ChannelPressure,
    PitchBend,
    SysEx,
    System,
    Unknown,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Empty => "empty",
            MessageKind::NoteOff => "noteoff",
            MessageKind::NoteOn => "noteon",
            MessageKind::Aftertouch => "aftertouch",
            MessageKind::ControlChange => "controlchange",
            MessageKind::ProgramChange => "programchange",
            MessageKind::ChannelPressure => "channelpressure",
            MessageKind::PitchBend => "pitchbend",
            MessageKind::SysEx => "sysex",
            MessageKind::System => "system",
            MessageKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind payload shown next to a log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDetail {
    Note { name: String, velocity: u8 },
    Controller { controller: u8, value: u8 },
    Program { program: u8 },
    PitchBend { value: i16 },
}

/// Decode raw bytes into a [`MidiEvent`]. Never panics.
pub fn decode(data: &[u8]) -> MidiEvent {
    let Some(&status) = data.first() else {
        return MidiEvent::Empty;
    };

    // Running status is not tracked; a leading data byte is undecodable
    if status < 0x80 {
        return MidiEvent::Unknown { data: data.to_vec() };
    }

    let channel = status & 0x0F;
    let decoded = match status >> 4 {
        0x8 => data_bytes2(data).map(|(note, velocity)| MidiEvent::NoteOff {
            channel,
            note,
            velocity,
        }),
        0x9 => data_bytes2(data).map(|(note, velocity)| {
            if velocity == 0 {
                MidiEvent::NoteOff {
                    channel,
                    note,
                    velocity,
                }
            } else {
                MidiEvent::NoteOn {
                    channel,
                    note,
                    velocity,
                }
            }
        }),
        0xA => data_bytes2(data).map(|(note, pressure)| MidiEvent::Aftertouch {
            channel,
            note,
            pressure,
        }),
        0xB => data_bytes2(data).map(|(controller, value)| MidiEvent::ControlChange {
            channel,
            controller,
            value,
        }),
        0xC => data_byte(data, 1).map(|program| MidiEvent::ProgramChange { channel, program }),
        0xD => data_byte(data, 1).map(|pressure| MidiEvent::ChannelPressure { channel, pressure }),
        0xE => data_bytes2(data).map(|(lsb, msb)| MidiEvent::PitchBend {
            channel,
            value: (((msb as i16) << 7) | lsb as i16) - PITCH_BEND_CENTER,
        }),
        0xF if status == 0xF0 => Some(MidiEvent::SysEx { data: data.to_vec() }),
        0xF => Some(MidiEvent::System { data: data.to_vec() }),
        _ => None,
    };

    decoded.unwrap_or_else(|| MidiEvent::Unknown { data: data.to_vec() })
}

fn data_byte(data: &[u8], index: usize) -> Option<u8> {
    data.get(index).copied().filter(|b| *b <= MAX_7BIT)
}

fn data_bytes2(data: &[u8]) -> Option<(u8, u8)> {
    Some((data_byte(data, 1)?, data_byte(data, 2)?))
}

impl MidiEvent {
    pub fn kind(&self) -> MessageKind {
        match self {
            MidiEvent::Empty => MessageKind::Empty,
            MidiEvent::NoteOff { .. } => MessageKind::NoteOff,
            MidiEvent::NoteOn { .. } => MessageKind::NoteOn,
            MidiEvent::Aftertouch { .. } => MessageKind::Aftertouch,
            MidiEvent::ControlChange { .. } => MessageKind::ControlChange,
            MidiEvent::ProgramChange { .. } => MessageKind::ProgramChange,
            MidiEvent::ChannelPressure { .. } => MessageKind::ChannelPressure,
            MidiEvent::PitchBend { .. } => MessageKind::PitchBend,
            MidiEvent::SysEx { .. } => MessageKind::SysEx,
            MidiEvent::System { .. } => MessageKind::System,
            MidiEvent::Unknown { .. } => MessageKind::Unknown,
        }
    }

    /// Get the channel for channel messages (0-15), None otherwise
    pub fn channel(&self) -> Option<u8> {
        match *self {
            MidiEvent::NoteOff { channel, .. }
            | MidiEvent::NoteOn { channel, .. }
            | MidiEvent::Aftertouch { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelPressure { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => Some(channel),
            _ => None,
        }
    }

    pub fn detail(&self) -> Option<EventDetail> {
        match *self {
            MidiEvent::NoteOff { note, velocity, .. } | MidiEvent::NoteOn { note, velocity, .. } => {
                Some(EventDetail::Note {
                    name: note_name(note),
                    velocity,
                })
            }
            MidiEvent::ControlChange {
                controller, value, ..
            } => Some(EventDetail::Controller { controller, value }),
            MidiEvent::ProgramChange { program, .. } => Some(EventDetail::Program { program }),
            MidiEvent::PitchBend { value, .. } => Some(EventDetail::PitchBend { value }),
            _ => None,
        }
    }
}

impl fmt::Display for MidiEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MidiEvent::Empty => write!(f, "Empty message"),
            MidiEvent::NoteOff {
                channel,
                note,
                velocity,
            } => write!(
                f,
                "Note Off: channel {}, note {}, velocity {}",
                channel + 1,
                note_name(*note),
                velocity
            ),
            MidiEvent::NoteOn {
                channel,
                note,
                velocity,
            } => write!(
                f,
                "Note On: channel {}, note {}, velocity {}",
                channel + 1,
                note_name(*note),
                velocity
            ),
            MidiEvent::Aftertouch {
                channel,
                note,
                pressure,
            } => write!(
                f,
                "Aftertouch: channel {}, note {}, pressure {}",
                channel + 1,
                note_name(*note),
                pressure
            ),
            MidiEvent::ControlChange {
                channel,
                controller,
                value,
            } => write!(
                f,
                "Control Change: channel {}, controller {}, value {}",
                channel + 1,
                controller,
                value
            ),
            MidiEvent::ProgramChange { channel, program } => {
                write!(f, "Program Change: channel {}, program {}", channel + 1, program)
            }
            MidiEvent::ChannelPressure { channel, pressure } => {
                write!(f, "Channel Pressure: channel {}, pressure {}", channel + 1, pressure)
            }
            MidiEvent::PitchBend { channel, value } => {
                write!(f, "Pitch Bend: channel {}, value {}", channel + 1, value)
            }
            MidiEvent::SysEx { data } => write!(f, "SysEx: {} bytes", data.len()),
            MidiEvent::System { data } => write!(f, "System Message: {}", format_hex(data)),
            MidiEvent::Unknown { data } => write!(f, "Unknown: {}", format_hex(data)),
        }
    }
}

/// Name a note number, e.g. 60 => "C4". Returns "Unknown" above 127.
pub fn note_name(note: u8) -> String {
    if note > MAX_7BIT {
        return "Unknown".to_string();
    }
    let octave = (note / 12) as i8 - 1;
    format!("{}{}", PITCH_CLASSES[(note % 12) as usize], octave)
}

/// Display-only label for the Digitakt's dedicated channels.
///
/// Channel 9 (index 8) is the default MIDI-track channel and channel 10
/// (index 9) the auto channel. Nothing in decoding depends on this.
pub fn digitakt_channel_label(channel: u8) -> Option<&'static str> {
    match channel {
        8 => Some("MIDI track"),
        9 => Some("auto channel"),
        _ => None,
    }
}

fn check_channel(channel: u8) -> Result<()> {
    if channel > MAX_CHANNEL {
        return Err(MidiError::range("channel", channel, MAX_CHANNEL as u32));
    }
    Ok(())
}

fn check_7bit(field: &'static str, value: u8) -> Result<()> {
    if value > MAX_7BIT {
        return Err(MidiError::range(field, value, MAX_7BIT as u32));
    }
    Ok(())
}

fn check_14bit(field: &'static str, value: u16) -> Result<()> {
    if value > MAX_14BIT {
        return Err(MidiError::range(field, value, MAX_14BIT as u32));
    }
    Ok(())
}

fn cc_status(channel: u8) -> u8 {
    0xB0 | (channel & 0x0F)
}

/// Encode a Control Change: `[0xB0|channel, controller, value]`
pub fn encode_cc(channel: u8, controller: u8, value: u8) -> Result<ShortMessage> {
    check_channel(channel)?;
    check_7bit("controller", controller)?;
    check_7bit("value", value)?;
    Ok([cc_status(channel), controller & 0x7F, value & 0x7F])
}

/// Encode an NRPN write as four Control Change messages.
///
/// Order is 99 (param MSB), 98 (param LSB), 6 (data MSB), 38 (data LSB);
/// receivers latch the parameter number before the data value.
pub fn encode_nrpn(channel: u8, parameter: u16, value: u16) -> Result<NrpnMessages> {
    check_channel(channel)?;
    check_14bit("nrpn parameter", parameter)?;
    check_14bit("nrpn value", value)?;

    let status = cc_status(channel);
    let (param_msb, param_lsb) = split_14bit(parameter);
    let (value_msb, value_lsb) = split_14bit(value);

    Ok([
        [status, CC_NRPN_MSB, param_msb],
        [status, CC_NRPN_LSB, param_lsb],
        [status, CC_DATA_ENTRY_MSB, value_msb],
        [status, CC_DATA_ENTRY_LSB, value_lsb],
    ])
}

pub fn encode_note_on(channel: u8, note: u8, velocity: u8) -> Result<ShortMessage> {
    check_channel(channel)?;
    check_7bit("note", note)?;
    check_7bit("velocity", velocity)?;
    Ok([0x90 | channel, note & 0x7F, velocity & 0x7F])
}

pub fn encode_note_off(channel: u8, note: u8, velocity: u8) -> Result<ShortMessage> {
    check_channel(channel)?;
    check_7bit("note", note)?;
    check_7bit("velocity", velocity)?;
    Ok([0x80 | channel, note & 0x7F, velocity & 0x7F])
}

pub fn encode_program_change(channel: u8, program: u8) -> Result<[u8; 2]> {
    check_channel(channel)?;
    check_7bit("program", program)?;
    Ok([0xC0 | channel, program & 0x7F])
}

/// Split a 14-bit value into (MSB, LSB), 7 bits each
pub fn split_14bit(value: u16) -> (u8, u8) {
    (((value >> 7) & 0x7F) as u8, (value & 0x7F) as u8)
}

pub fn join_14bit(msb: u8, lsb: u8) -> u16 {
    (((msb & 0x7F) as u16) << 7) | (lsb & 0x7F) as u16
}

/// A completed inbound NRPN write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NrpnWrite {
    pub channel: u8,
    pub parameter: u16,
    pub value: u16,
}

#[derive(Debug, Clone, Copy, Default)]
struct NrpnLatch {
    param_msb: Option<u8>,
    param_lsb: Option<u8>,
    data_msb: Option<u8>,
}

/// Latching NRPN receiver, one latch per channel.
///
/// The parameter number stays latched after a write so a device can send
/// several data entries for the same parameter.
#[derive(Debug, Default)]
pub struct NrpnReceiver {
    latches: [NrpnLatch; 16],
}

impl NrpnReceiver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one decoded event; returns a write once the data LSB arrives
    pub fn feed(&mut self, event: &MidiEvent) -> Option<NrpnWrite> {
        let MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } = *event
        else {
            return None;
        };
        let latch = &mut self.latches[(channel & 0x0F) as usize];

        match controller {
            CC_NRPN_MSB => {
                latch.param_msb = Some(value);
                latch.param_lsb = None;
                latch.data_msb = None;
                None
            }
            CC_NRPN_LSB => {
                latch.param_lsb = Some(value);
                latch.data_msb = None;
                None
            }
            CC_DATA_ENTRY_MSB => {
                latch.data_msb = Some(value);
                None
            }
            CC_DATA_ENTRY_LSB => {
                let write = NrpnWrite {
                    channel,
                    parameter: join_14bit(latch.param_msb?, latch.param_lsb?),
                    value: join_14bit(latch.data_msb?, value),
                };
                latch.data_msb = None;
                Some(write)
            }
            _ => None,
        }
    }
}

/// Format MIDI bytes as lowercase hex, space separated
pub fn format_hex(data: &[u8]) -> String {
    data.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
