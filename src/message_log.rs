//! Message log and traffic statistics
//!
//! A bounded, newest-first log of decoded MIDI traffic plus system and error
//! entries. The log is an owned value; whoever needs it borrows it from the
//! [`Controller`](crate::controller::Controller).

use chrono::{DateTime, Local};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::time::Instant;

use crate::midi::{EventDetail, MessageKind, MidiEvent};

/// Default number of entries kept
pub const DEFAULT_CAPACITY: usize = 100;

/// Number of inter-arrival gaps averaged
const TIMING_WINDOW: usize = 50;

/// Number of error messages remembered in the stats
const ERROR_HISTORY: usize = 20;

/// Where a log entry came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    In,
    Out,
    System,
    Error,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::In => "IN",
            Direction::Out => "OUT",
            Direction::System => "SYS",
            Direction::Error => "ERR",
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub direction: Direction,
    /// None for system and error entries
    pub kind: Option<MessageKind>,
    pub summary: String,
    pub raw: Vec<u8>,
    pub timestamp: DateTime<Local>,
    /// Channel (0-15) of channel messages
    pub channel: Option<u8>,
    pub detail: Option<EventDetail>,
}

impl LogEntry {
    /// Entry for a decoded MIDI message travelling in `direction`
    pub fn message(direction: Direction, event: &MidiEvent, raw: &[u8]) -> Self {
        Self {
            direction,
            kind: Some(event.kind()),
            summary: event.to_string(),
            raw: raw.to_vec(),
            timestamp: Local::now(),
            channel: event.channel(),
            detail: event.detail(),
        }
    }

    pub fn system(summary: impl Into<String>) -> Self {
        Self::text(Direction::System, summary.into())
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self::text(Direction::Error, summary.into())
    }

    fn text(direction: Direction, summary: String) -> Self {
        Self {
            direction,
            kind: None,
            summary,
            raw: Vec::new(),
            timestamp: Local::now(),
            channel: None,
            detail: None,
        }
    }
}

/// Counters over everything ever logged (not just what is still retained)
#[derive(Debug, Clone, Default)]
pub struct TrafficStats {
    pub total_messages: u64,
    pub by_kind: BTreeMap<MessageKind, u64>,
    /// Keyed by 1-based channel, as displayed
    pub by_channel: BTreeMap<u8, u64>,
    pub errors: VecDeque<String>,
    gaps_ms: VecDeque<f64>,
    last_message: Option<Instant>,
}

impl TrafficStats {
    fn record(&mut self, entry: &LogEntry, now: Instant) {
        if let Some(last) = self.last_message {
            // Receipt times may run behind the previous entry
            self.gaps_ms
                .push_back(now.saturating_duration_since(last).as_secs_f64() * 1000.0);
            if self.gaps_ms.len() > TIMING_WINDOW {
                self.gaps_ms.pop_front();
            }
        }
        self.last_message = Some(now);

        self.total_messages += 1;
        if let Some(kind) = entry.kind {
            *self.by_kind.entry(kind).or_default() += 1;
        }
        if let Some(channel) = entry.channel {
            *self.by_channel.entry(channel + 1).or_default() += 1;
        }
        if entry.direction == Direction::Error {
            self.errors.push_back(entry.summary.clone());
            if self.errors.len() > ERROR_HISTORY {
                self.errors.pop_front();
            }
        }
    }

    /// Mean time between consecutive log entries over the last 50 gaps
    pub fn average_gap_ms(&self) -> Option<f64> {
        if self.gaps_ms.is_empty() {
            return None;
        }
        Some(self.gaps_ms.iter().sum::<f64>() / self.gaps_ms.len() as f64)
    }

    fn reset_timing(&mut self) {
        self.gaps_ms.clear();
        self.last_message = None;
    }
}

/// Bounded newest-first message log
#[derive(Debug, Clone)]
pub struct MessageLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
    stats: TrafficStats,
}

impl Default for MessageLog {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl MessageLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
            stats: TrafficStats::default(),
        }
    }

    /// Insert at the head, evicting the oldest entry beyond capacity
    pub fn push(&mut self, entry: LogEntry) {
        self.push_at(entry, Instant::now());
    }

    /// Like [`push`](Self::push), timing the entry at `at` (e.g. when the
    /// backend received the bytes) rather than now
    pub fn push_at(&mut self, entry: LogEntry, at: Instant) {
        self.stats.record(&entry, at);
        self.entries.push_front(entry);
        self.entries.truncate(self.capacity);
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.front()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Change the capacity, dropping the oldest entries if it shrank
    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.entries.truncate(self.capacity);
    }

    pub fn stats(&self) -> &TrafficStats {
        &self.stats
    }

    /// Drop all entries and counters
    pub fn clear(&mut self) {
        self.entries.clear();
        self.stats = TrafficStats::default();
    }

    pub fn reset_timing(&mut self) {
        self.stats.reset_timing();
    }
}
